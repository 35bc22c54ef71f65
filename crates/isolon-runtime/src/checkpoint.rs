//! Persistent container checkpoints.
//!
//! A JSON index of every running container is kept on disk so that a
//! restarted containerizer can rebuild its registry. Writes go to a
//! temporary file first and are renamed into place.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerRecoverInfo, ContainerState};
use isolon_common::types::ContainerId;
use serde::{Deserialize, Serialize};

const CHECKPOINT_VERSION: u32 = 1;

/// One checkpointed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    /// Facts needed to recover the container.
    #[serde(flatten)]
    pub state: ContainerState,
    /// When this entry was last written.
    pub checkpointed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    containers: Vec<CheckpointEntry>,
}

/// File-backed checkpoint index.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CheckpointStore {
    /// Opens the store at `path`. The file is created on first save.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every checkpointed entry. A missing file is an empty index.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<CheckpointEntry>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read()
    }

    /// Loads the checkpointed states.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn states(&self) -> Result<Vec<ContainerState>> {
        Ok(self.load()?.into_iter().map(|e| e.state).collect())
    }

    /// Inserts or replaces the entry for `state.container_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn save(&self, state: &ContainerState) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        entries.retain(|e| e.state.container_id != state.container_id);
        entries.push(CheckpointEntry {
            state: state.clone(),
            checkpointed_at: Utc::now(),
        });
        self.write(entries)
    }

    /// Removes the entry for `id`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn remove(&self, id: &ContainerId) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read()?;
        let before = entries.len();
        entries.retain(|e| &e.state.container_id != id);
        if entries.len() == before {
            return Ok(());
        }
        self.write(entries)
    }

    /// Builds reconciliation input from this index and the ids the launcher
    /// can still see.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn recover_info(
        &self,
        known: impl IntoIterator<Item = ContainerId>,
        orphans: impl IntoIterator<Item = ContainerId>,
    ) -> Result<ContainerRecoverInfo> {
        let checkpointed = self.states()?;
        let mut known_container_ids: BTreeSet<ContainerId> = known.into_iter().collect();
        known_container_ids.extend(checkpointed.iter().map(|s| s.container_id.clone()));
        Ok(ContainerRecoverInfo {
            checkpointed,
            orphan_container_ids: orphans.into_iter().collect(),
            known_container_ids,
        })
    }

    fn read(&self) -> Result<Vec<CheckpointEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(IsolonError::Io {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };
        let file: CheckpointFile = serde_json::from_str(&content)?;
        if file.version != CHECKPOINT_VERSION {
            tracing::warn!(
                path = %self.path.display(),
                version = file.version,
                "unexpected checkpoint version"
            );
        }
        Ok(file.containers)
    }

    fn write(&self, mut containers: Vec<CheckpointEntry>) -> Result<()> {
        containers.sort_by(|a, b| a.state.container_id.cmp(&b.state.container_id));
        let file = CheckpointFile {
            version: CHECKPOINT_VERSION,
            updated_at: Utc::now(),
            containers,
        };
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| IsolonError::Io { path, source }
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&file)?).map_err(io_err(&tmp))?;
        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        tracing::debug!(
            path = %self.path.display(),
            containers = file.containers.len(),
            "checkpoint written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &ContainerId, pid: u32) -> ContainerState {
        ContainerState {
            executor_info: None,
            container_id: id.clone(),
            pid,
            directory: PathBuf::from("/sandbox"),
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(dir.path().join("none.json"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn save_replaces_and_remove_prunes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(dir.path().join("state/checkpoint.json"));
        let a = ContainerId::new("a");
        let b = a.child("b");

        store.save(&state(&a, 10)).expect("save a");
        store.save(&state(&b, 11)).expect("save b");
        store.save(&state(&a, 12)).expect("resave a");

        let states = store.states().expect("states");
        assert_eq!(states.len(), 2);
        assert_eq!(states.iter().find(|s| s.container_id == a).map(|s| s.pid), Some(12));

        store.remove(&a).expect("remove");
        store.remove(&a).expect("remove twice");
        assert_eq!(store.states().expect("states"), vec![state(&b, 11)]);
    }

    #[test]
    fn recover_info_adds_checkpointed_to_known() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::open(dir.path().join("checkpoint.json"));
        let a = ContainerId::new("a");
        store.save(&state(&a, 10)).expect("save");

        let stray = ContainerId::new("stray");
        let info = store.recover_info([stray.clone()], []).expect("info");
        assert!(info.known_container_ids.contains(&a));
        assert_eq!(info.untracked(), [stray].into());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            CheckpointStore::open(path).load(),
            Err(IsolonError::Serialization { .. })
        ));
    }
}

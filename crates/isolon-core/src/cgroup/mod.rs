//! Cgroups v2 resource management.
//!
//! Provides the per-container cgroup handle and the control-file helpers
//! used by the cgroup isolators. Everything operates on plain paths under a
//! configurable root so the same code drives `/sys/fs/cgroup` and test
//! directories.

pub mod cpu;
pub mod isolator;
pub mod memory;

use std::path::{Path, PathBuf};
use std::time::Duration;

use isolon_common::constants::CGROUP_PREFIX;
use isolon_common::error::{IsolonError, Result};
use isolon_common::types::ContainerId;

const REMOVE_ATTEMPTS: u32 = 5;
const REMOVE_BACKOFF: Duration = Duration::from_millis(20);

/// Handle to the cgroup of a specific container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupManager {
    path: PathBuf,
}

impl CgroupManager {
    /// Returns the handle for `id` under `root`, without touching the filesystem.
    ///
    /// The cgroup lives at `<root>/isolon/<segment>/...`, one directory per
    /// id segment so nested containers sit below their parent.
    #[must_use]
    pub fn for_container(root: &Path, id: &ContainerId) -> Self {
        let mut path = root.join(CGROUP_PREFIX);
        for segment in id.segments() {
            path.push(segment);
        }
        Self { path }
    }

    /// Path to this container's cgroup directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether the cgroup directory exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// Creates the cgroup directory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup directory cannot be created.
    pub fn create(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path).map_err(|e| IsolonError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.path.display(), "cgroup created");
        Ok(())
    }

    /// Adds a process to this cgroup by writing its PID.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, pid: u32) -> Result<()> {
        write_control(&self.path, "cgroup.procs", &pid.to_string())?;
        tracing::debug!(pid, path = %self.path.display(), "added process to cgroup");
        Ok(())
    }

    /// Kills every process in the cgroup, then removes it.
    ///
    /// Uses `cgroup.kill` when the kernel provides it and retries `rmdir`
    /// briefly while the kernel reaps the killed tasks. Directories that are
    /// not on a cgroup filesystem are removed recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup directory cannot be removed.
    pub async fn destroy(&self) -> Result<()> {
        if !self.exists() {
            return Ok(());
        }
        if self.path.join("cgroup.kill").exists() {
            write_control(&self.path, "cgroup.kill", "1")?;
        }

        let mut last_error = None;
        for _ in 0..REMOVE_ATTEMPTS {
            match std::fs::remove_dir(&self.path) {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    last_error = None;
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::DirectoryNotEmpty => {
                    std::fs::remove_dir_all(&self.path).map_err(|e| IsolonError::Io {
                        path: self.path.clone(),
                        source: e,
                    })?;
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    tokio::time::sleep(REMOVE_BACKOFF).await;
                }
            }
        }
        if let Some(e) = last_error {
            return Err(IsolonError::Io {
                path: self.path.clone(),
                source: e,
            });
        }
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }
}

/// Lists every container cgroup under `root`, nested ones included, with
/// the first pid found in its `cgroup.procs`.
///
/// Parents are listed before their children.
///
/// # Errors
///
/// Returns an error if a cgroup directory cannot be read.
pub fn discover(root: &Path) -> Result<Vec<(ContainerId, Option<u32>)>> {
    let base = root.join(CGROUP_PREFIX);
    let mut found = Vec::new();
    let mut pending: Vec<(PathBuf, Option<ContainerId>)> = vec![(base, None)];
    while let Some((dir, parent)) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(IsolonError::Io { path: dir, source: e }),
        };
        let mut children: Vec<_> = entries
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        children.sort();
        for name in children.into_iter().rev() {
            let id = match &parent {
                Some(parent) => parent.child(name.as_str()),
                None => ContainerId::new(name.as_str()),
            };
            let path = dir.join(&name);
            let pid = std::fs::read_to_string(path.join("cgroup.procs"))
                .ok()
                .and_then(|procs| procs.lines().next().and_then(|l| l.trim().parse().ok()));
            found.push((id.clone(), pid));
            pending.push((path, Some(id)));
        }
    }
    found.sort_by_key(|(id, _)| id.depth());
    Ok(found)
}

/// Writes a value to a cgroup control file.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_control(cgroup: &Path, file: &str, value: &str) -> Result<()> {
    let path = cgroup.join(file);
    std::fs::write(&path, value).map_err(|e| IsolonError::Io { path, source: e })
}

/// Reads a single-value control file.
///
/// Returns `None` when the file is missing or holds `max`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn read_u64(cgroup: &Path, file: &str) -> Result<Option<u64>> {
    let path = cgroup.join(file);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IsolonError::Io { path, source: e }),
    };
    let value = content.trim();
    if value == "max" {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|_| {
        IsolonError::invalid_config(format!("unexpected value '{value}' in {}", path.display()))
    })
}

/// Reads one key from a flat-keyed control file such as `memory.events`.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_keyed(cgroup: &Path, file: &str, key: &str) -> Result<Option<u64>> {
    let path = cgroup.join(file);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IsolonError::Io { path, source: e }),
    };
    Ok(content.lines().find_map(|line| {
        let (k, v) = line.split_once(' ')?;
        if k == key { v.trim().parse().ok() } else { None }
    }))
}

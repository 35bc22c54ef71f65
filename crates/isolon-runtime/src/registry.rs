//! The container registry.
//!
//! A sharded map from id to entry. Each entry carries its own locks, so
//! operations on different ids never contend and operations on the same id
//! serialize on that entry alone.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{
    ContainerLaunchInfo, ContainerLimitation, ContainerTermination, ExecutorInfo,
};
use isolon_common::types::{ContainerId, LifecycleState};
use isolon_core::isolator::Isolator;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::termination::TerminationCause;

/// Mutable lifecycle record of one container.
pub struct ContainerRecord {
    pub state: LifecycleState,
    /// Isolators that must receive `cleanup`, in prepare order.
    pub prepared: Vec<Arc<dyn Isolator>>,
    pub launch_info: Option<ContainerLaunchInfo>,
    pub executor: Option<ExecutorInfo>,
    pub pid: Option<u32>,
    pub directory: PathBuf,
    pub watching: bool,
    /// First limitation, with later ones of the same interval coalesced in.
    pub limitation: Option<ContainerLimitation>,
    /// End of the interval in which limitations still fold into `limitation`.
    pub coalesce_until: Option<tokio::time::Instant>,
    /// Limitations that arrived after that interval; diagnostics only.
    pub late_limitations: Vec<ContainerLimitation>,
    pub cause: Option<TerminationCause>,
}

/// One registered container.
pub struct ContainerEntry {
    pub id: ContainerId,
    record: Mutex<ContainerRecord>,
    /// Serializes launch, update, and teardown for this id.
    pub op: tokio::sync::Mutex<()>,
    /// Cancels an in-flight prepare pipeline.
    pub cancel: CancellationToken,
    /// Stops the limitation monitor.
    pub monitor: CancellationToken,
    termination: watch::Sender<Option<ContainerTermination>>,
}

impl ContainerEntry {
    pub fn new(id: ContainerId, state: LifecycleState, directory: PathBuf) -> Self {
        let (termination, _) = watch::channel(None);
        Self {
            id,
            record: Mutex::new(ContainerRecord {
                state,
                prepared: Vec::new(),
                launch_info: None,
                executor: None,
                pid: None,
                directory,
                watching: false,
                limitation: None,
                coalesce_until: None,
                late_limitations: Vec::new(),
                cause: None,
            }),
            op: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
            monitor: CancellationToken::new(),
            termination,
        }
    }

    /// Locks the record. Never hold the guard across an await point.
    pub fn record(&self) -> MutexGuard<'_, ContainerRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LifecycleState {
        self.record().state
    }

    pub fn publish(&self, termination: ContainerTermination) {
        let _ = self.termination.send_replace(Some(termination));
    }

    /// Resolves once the termination was published.
    pub async fn terminated(&self) -> ContainerTermination {
        let mut rx = self.termination.subscribe();
        let published = rx.wait_for(Option::is_some).await.ok().and_then(|t| t.clone());
        published.unwrap_or_else(|| ContainerTermination {
            status: None,
            state: None,
            reasons: Vec::new(),
            message: "termination channel closed".into(),
        })
    }
}

#[derive(Default)]
pub struct Registry {
    containers: DashMap<ContainerId, Arc<ContainerEntry>>,
}

impl Registry {
    pub fn insert(&self, entry: Arc<ContainerEntry>) -> Result<()> {
        match self.containers.entry(entry.id.clone()) {
            Entry::Occupied(_) => Err(IsolonError::DuplicateContainer {
                id: entry.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                let _ = slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &ContainerId) -> Option<Arc<ContainerEntry>> {
        self.containers.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn lookup(&self, id: &ContainerId) -> Result<Arc<ContainerEntry>> {
        self.get(id).ok_or_else(|| IsolonError::UnknownContainer { id: id.to_string() })
    }

    pub fn remove(&self, id: &ContainerId) {
        let _ = self.containers.remove(id);
    }

    pub fn ids(&self) -> Vec<ContainerId> {
        let mut ids: Vec<_> = self.containers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Direct children of `parent`.
    pub fn children(&self, parent: &ContainerId) -> Vec<Arc<ContainerEntry>> {
        self.containers
            .iter()
            .filter(|e| e.key().parent() == Some(parent))
            .map(|e| Arc::clone(e.value()))
            .collect()
    }
}

//! Reconciling the registry with containers that survived a restart.
//!
//! Checkpointed containers are re-registered in `RECOVERING` and every
//! applicable isolator replays `recover`; a clean replay puts them back to
//! `RUNNING`. Everything that cannot be re-supervised is destroyed:
//! failed replays, orphans, and ids the launcher knows but nothing
//! checkpointed. Launches stay queued until this finishes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerRecoverInfo, ContainerState};
use isolon_common::types::{ContainerId, LifecycleState};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::containerizer::{Containerizer, Inner};
use crate::monitor;
use crate::registry::ContainerEntry;
use crate::termination::TerminationCause;

/// What happened to one known container during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Back under supervision in `RUNNING`.
    Recovered,
    /// Could not be re-supervised and was destroyed.
    Destroyed,
}

/// Outcome per known container id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Every id recovery handled.
    pub outcomes: BTreeMap<ContainerId, RecoveryOutcome>,
}

impl RecoveryReport {
    /// Ids back in `RUNNING`.
    pub fn recovered(&self) -> impl Iterator<Item = &ContainerId> {
        self.with(RecoveryOutcome::Recovered)
    }

    /// Ids that were destroyed.
    pub fn destroyed(&self) -> impl Iterator<Item = &ContainerId> {
        self.with(RecoveryOutcome::Destroyed)
    }

    fn with(&self, outcome: RecoveryOutcome) -> impl Iterator<Item = &ContainerId> {
        self.outcomes
            .iter()
            .filter(move |(_, o)| **o == outcome)
            .map(|(id, _)| id)
    }
}

impl Containerizer {
    /// Recovers containers from a previous run. Runs at most once.
    ///
    /// Per-container failures never fail the call; they lead to that
    /// container's destruction. Queued launches proceed once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::RecoveryAlreadyCompleted`] on a second call.
    pub async fn recover(&self, mut info: ContainerRecoverInfo) -> Result<RecoveryReport> {
        if self.inner.recovery_started.swap(true, Ordering::SeqCst) {
            return Err(IsolonError::RecoveryAlreadyCompleted);
        }
        for id in info.normalize() {
            tracing::warn!(id = %id, "repaired inconsistent recovery input");
        }
        let untracked = info.untracked();
        tracing::info!(
            checkpointed = info.checkpointed.len(),
            orphans = info.orphan_container_ids.len(),
            untracked = untracked.len(),
            "starting recovery"
        );

        let mut checkpointed = info.checkpointed;
        checkpointed.sort_by(|a, b| {
            a.container_id
                .depth()
                .cmp(&b.container_id.depth())
                .then_with(|| a.container_id.cmp(&b.container_id))
        });

        let mut recovered = Vec::new();
        let mut doomed: Vec<(Arc<ContainerEntry>, TerminationCause)> = Vec::new();
        let mut doomed_ids = BTreeSet::new();

        for state in &checkpointed {
            let Some(entry) = self.inner.register_recovering(state) else {
                continue;
            };
            let parent_doomed = state
                .container_id
                .parent()
                .is_some_and(|p| doomed_ids.contains(p));
            let result = if parent_doomed {
                Err("parent container was not recovered".to_string())
            } else {
                self.inner
                    .replay_recover(&entry, state)
                    .await
                    .map_err(|e| e.to_string())
            };
            match result {
                Ok(()) => match self.inner.transition(&entry, LifecycleState::Running) {
                    Ok(()) => {
                        tracing::info!(id = %entry.id, pid = state.pid, "container recovered");
                        recovered.push(entry);
                    }
                    Err(err) => {
                        let _ = doomed_ids.insert(entry.id.clone());
                        doomed.push((entry, TerminationCause::RecoveryFailed(err.to_string())));
                    }
                },
                Err(message) => {
                    tracing::warn!(id = %entry.id, error = %message, "recovery failed, destroying");
                    let _ = doomed_ids.insert(entry.id.clone());
                    doomed.push((entry, TerminationCause::RecoveryFailed(message)));
                }
            }
        }

        for id in &info.orphan_container_ids {
            let state = self.inner.degraded_state(id);
            let Some(entry) = self.inner.register_recovering(&state) else {
                continue;
            };
            if let Err(err) = self.inner.replay_recover(&entry, &state).await {
                tracing::debug!(id = %id, error = %err, "orphan recovery incomplete");
            }
            tracing::warn!(id = %id, "destroying orphan container");
            doomed.push((
                entry,
                TerminationCause::RecoveryFailed("orphan container has no checkpoint".into()),
            ));
        }

        for id in &untracked {
            let state = self.inner.degraded_state(id);
            let Some(entry) = self.inner.register_recovering(&state) else {
                continue;
            };
            tracing::warn!(id = %id, "destroying untracked container");
            doomed.push((
                entry,
                TerminationCause::RecoveryFailed("container has no checkpoint".into()),
            ));
        }

        for entry in &recovered {
            let pid = entry.record().pid;
            if let Some(pid) = pid {
                self.inner.spawn_exit_waiter(entry, pid);
            }
            entry.record().watching = true;
            monitor::spawn(&self.inner, entry);
        }

        let mut report = RecoveryReport::default();
        let mut destroys = JoinSet::new();
        for (entry, cause) in doomed {
            let _ = report
                .outcomes
                .insert(entry.id.clone(), RecoveryOutcome::Destroyed);
            let _ = destroys.spawn(self.inner.destroy_entry(entry, cause));
        }
        while let Some(joined) = destroys.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "destroy task failed during recovery");
            }
        }

        for entry in recovered {
            let outcome = if entry.state() == LifecycleState::Running {
                RecoveryOutcome::Recovered
            } else {
                RecoveryOutcome::Destroyed
            };
            let _ = report.outcomes.insert(entry.id.clone(), outcome);
        }

        self.inner.finish_recovery();
        tracing::info!(
            recovered = report.recovered().count(),
            destroyed = report.destroyed().count(),
            "recovery complete"
        );
        Ok(report)
    }
}

impl Inner {
    /// Registers `state` in `RECOVERING` with every applicable isolator
    /// marked for cleanup. Returns `None` for ids already registered.
    fn register_recovering(&self, state: &ContainerState) -> Option<Arc<ContainerEntry>> {
        let id = &state.container_id;
        let entry = Arc::new(ContainerEntry::new(
            id.clone(),
            LifecycleState::Recovering,
            state.directory.clone(),
        ));
        {
            let mut record = entry.record();
            record.pid = (state.pid != 0).then_some(state.pid);
            record.executor.clone_from(&state.executor_info);
            record.prepared = self.eligible(id);
        }
        if let Err(err) = self.registry.insert(Arc::clone(&entry)) {
            tracing::warn!(id = %id, error = %err, "skipping container during recovery");
            return None;
        }
        self.emit(id, None, LifecycleState::Recovering);
        Some(entry)
    }

    /// Calls `recover` on every prepared isolator; returns the first error.
    async fn replay_recover(&self, entry: &ContainerEntry, state: &ContainerState) -> Result<()> {
        let prepared = entry.record().prepared.clone();
        let mut first_error = None;
        for isolator in prepared {
            if let Err(err) = self
                .call(isolator.name(), "recover", isolator.recover(state))
                .await
            {
                tracing::warn!(id = %entry.id, isolator = isolator.name(), error = %err, "isolator recovery failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// State of a container known only by id.
    fn degraded_state(&self, id: &ContainerId) -> ContainerState {
        ContainerState {
            executor_info: None,
            container_id: id.clone(),
            pid: self.launcher.pid(id).unwrap_or_default(),
            directory: self
                .options
                .runtime_dir
                .join("containers")
                .join(id.to_string()),
        }
    }
}

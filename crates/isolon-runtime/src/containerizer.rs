//! The containerizer that coordinates isolators across a container's lifecycle.
//!
//! Every container moves through
//! `LAUNCHING -> ISOLATING -> RUNNING -> (LIMITED) -> DESTROYING -> TERMINATED`,
//! with `RECOVERING` replacing the first two after a restart. Entering
//! `DESTROYING` is the single gate to teardown: whoever wins it runs cleanup
//! and produces the termination, everyone else waits for that result.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use isolon_common::config::IsolonConfig;
use isolon_common::constants::{
    DEFAULT_ISOLATOR_TIMEOUT_SECS, DEFAULT_MONITOR_INTERVAL_MS, EVENT_CHANNEL_CAPACITY,
};
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{
    ContainerConfig, ContainerLaunchInfo, ContainerLimitation, ContainerState,
    ContainerTermination,
};
use isolon_common::resources::{ResourceStatistics, Resources};
use isolon_common::types::{ContainerId, LifecycleState};
use isolon_core::isolator::{Isolator, sort_by_stage};
use tokio::sync::{broadcast, watch};

use crate::checkpoint::CheckpointStore;
use crate::events::LifecycleEvent;
use crate::launcher::Launcher;
use crate::merge::LaunchInfoMerger;
use crate::monitor;
use crate::registry::{ContainerEntry, Registry};
use crate::termination::{self, TerminationCause};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Tunables for a [`Containerizer`].
#[derive(Debug, Clone)]
pub struct ContainerizerOptions {
    /// Upper bound for every individual isolator call.
    pub isolator_timeout: Duration,
    /// Window in which limitations of one container are coalesced.
    pub monitor_interval: Duration,
    /// Root of runtime-owned directories.
    pub runtime_dir: PathBuf,
    /// Checkpoint index; `None` disables checkpointing.
    pub checkpoint_file: Option<PathBuf>,
}

impl Default for ContainerizerOptions {
    fn default() -> Self {
        Self {
            isolator_timeout: Duration::from_secs(DEFAULT_ISOLATOR_TIMEOUT_SECS),
            monitor_interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
            runtime_dir: isolon_common::constants::runtime_dir().clone(),
            checkpoint_file: None,
        }
    }
}

impl ContainerizerOptions {
    /// Derives options from the runtime configuration.
    #[must_use]
    pub fn from_config(config: &IsolonConfig) -> Self {
        Self {
            isolator_timeout: config.isolator_timeout(),
            monitor_interval: config.monitor_interval(),
            runtime_dir: config.runtime_dir.clone(),
            checkpoint_file: Some(config.checkpoint_file.clone()),
        }
    }
}

pub(crate) struct Inner {
    pub isolators: Vec<Arc<dyn Isolator>>,
    pub launcher: Arc<dyn Launcher>,
    pub registry: Registry,
    pub checkpoints: Option<CheckpointStore>,
    pub options: ContainerizerOptions,
    events: broadcast::Sender<LifecycleEvent>,
    terminations: broadcast::Sender<(ContainerId, ContainerTermination)>,
    recovered: watch::Sender<bool>,
    pub recovery_started: AtomicBool,
}

/// Orchestrates isolators and the launcher for every container.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Containerizer {
    pub(crate) inner: Arc<Inner>,
}

impl Containerizer {
    /// Creates a containerizer over `isolators`, sorted into pipeline order.
    ///
    /// `launch` calls are held back until [`Containerizer::recover`] has run.
    #[must_use]
    pub fn new(
        mut isolators: Vec<Arc<dyn Isolator>>,
        launcher: Arc<dyn Launcher>,
        options: ContainerizerOptions,
    ) -> Self {
        sort_by_stage(&mut isolators);
        let checkpoints = options.checkpoint_file.as_ref().map(CheckpointStore::open);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (terminations, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (recovered, _) = watch::channel(false);
        tracing::debug!(
            isolators = ?isolators.iter().map(|i| i.name()).collect::<Vec<_>>(),
            "containerizer created"
        );
        Self {
            inner: Arc::new(Inner {
                isolators,
                launcher,
                registry: Registry::default(),
                checkpoints,
                options,
                events,
                terminations,
                recovered,
                recovery_started: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a containerizer with the isolators named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_config(config: &IsolonConfig, launcher: Arc<dyn Launcher>) -> Result<Self> {
        config.validate()?;
        let isolators = isolon_core::isolators::build(config)?;
        Ok(Self::new(isolators, launcher, ContainerizerOptions::from_config(config)))
    }

    /// Names of the configured isolators, in pipeline order.
    #[must_use]
    pub fn isolator_names(&self) -> Vec<String> {
        self.inner.isolators.iter().map(|i| i.name().to_string()).collect()
    }

    /// The checkpoint store, when checkpointing is enabled.
    #[must_use]
    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.inner.checkpoints.as_ref()
    }

    /// Launches a container and returns its id once it is `RUNNING`.
    ///
    /// Waits for recovery to complete first. The prepare pipeline runs each
    /// applicable isolator in order and merges their outputs; any failure
    /// cleans up the isolators that were prepared before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::InvalidConfig`] without registering anything,
    /// [`IsolonError::DuplicateContainer`] for a taken id,
    /// [`IsolonError::UnknownContainer`] for a nested id whose parent is not
    /// live, [`IsolonError::LaunchCancelled`] when a concurrent `destroy` won,
    /// or the isolator/launcher error that aborted the launch.
    pub async fn launch(&self, config: ContainerConfig) -> Result<ContainerId> {
        config.validate()?;
        self.inner.recovery_complete().await;

        let id = config.container_id.clone().unwrap_or_else(ContainerId::generate);
        if let Some(parent) = id.parent() {
            let live = self.inner.registry.get(parent).is_some_and(|p| {
                !matches!(p.state(), LifecycleState::Destroying | LifecycleState::Terminated)
            });
            if !live {
                return Err(IsolonError::UnknownContainer {
                    id: parent.to_string(),
                });
            }
        }

        let entry = Arc::new(ContainerEntry::new(
            id.clone(),
            LifecycleState::Launching,
            config.sandbox().to_path_buf(),
        ));
        entry.record().executor.clone_from(&config.executor_info);
        let guard = entry.op.lock().await;
        self.inner.registry.insert(Arc::clone(&entry))?;
        self.inner.emit(&id, None, LifecycleState::Launching);
        tracing::info!(id = %id, class = ?config.container_class, "launching container");

        match self.inner.run_launch(&entry, &config).await {
            Ok(pid) => {
                drop(guard);
                tracing::info!(id = %id, pid, "container running");
                Ok(id)
            }
            Err(err) => {
                let cause = TerminationCause::LaunchFailed(err.to_string());
                if self.inner.begin_destroy(&entry, cause) {
                    tracing::warn!(id = %id, error = %err, "launch failed, unwinding");
                    let _ = self.inner.teardown(&entry).await;
                    drop(guard);
                    Err(err)
                } else {
                    drop(guard);
                    if entry.cancel.is_cancelled() {
                        Err(IsolonError::LaunchCancelled { id: id.to_string() })
                    } else {
                        Err(err)
                    }
                }
            }
        }
    }

    /// Starts the limitation monitor for a running container.
    ///
    /// Calling it again for the same container is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] or
    /// [`IsolonError::NotRunning`].
    pub fn watch(&self, id: &ContainerId) -> Result<()> {
        let entry = self.inner.registry.lookup(id)?;
        {
            let mut record = entry.record();
            if record.state != LifecycleState::Running {
                return Err(IsolonError::NotRunning {
                    id: id.to_string(),
                    state: record.state,
                });
            }
            if record.watching {
                return Ok(());
            }
            record.watching = true;
        }
        monitor::spawn(&self.inner, &entry);
        Ok(())
    }

    /// Destroys a container and returns its termination.
    ///
    /// If another path already entered `DESTROYING`, waits for that
    /// teardown instead of starting a second one.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] for ids that are not
    /// registered or already terminated.
    pub async fn destroy(&self, id: &ContainerId) -> Result<ContainerTermination> {
        let entry = self.inner.registry.lookup(id)?;
        Ok(self.inner.destroy_entry(entry, TerminationCause::Request).await)
    }

    /// Resolves with the container's termination.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] for unregistered ids.
    pub async fn wait(&self, id: &ContainerId) -> Result<ContainerTermination> {
        let entry = self.inner.registry.lookup(id)?;
        Ok(entry.terminated().await)
    }

    /// Applies new resource shares to a running container.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::NotRunning`] outside `RUNNING`, or the first
    /// isolator error.
    pub async fn update(&self, id: &ContainerId, resources: Resources) -> Result<()> {
        let entry = self.inner.registry.lookup(id)?;
        let _guard = entry.op.lock().await;
        let (state, prepared) = {
            let record = entry.record();
            (record.state, record.prepared.clone())
        };
        if state != LifecycleState::Running {
            return Err(IsolonError::NotRunning {
                id: id.to_string(),
                state,
            });
        }
        for isolator in prepared {
            self.inner
                .call(isolator.name(), "update", isolator.update(id, &resources))
                .await?;
        }
        tracing::info!(id = %id, resources = %resources, "container resources updated");
        Ok(())
    }

    /// Collects resource statistics from every prepared isolator.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] or the first isolator error.
    pub async fn usage(&self, id: &ContainerId) -> Result<ResourceStatistics> {
        let entry = self.inner.registry.lookup(id)?;
        let prepared = entry.record().prepared.clone();
        let mut stats = ResourceStatistics::default();
        for isolator in prepared {
            stats.overlay(
                self.inner
                    .call(isolator.name(), "usage", isolator.usage(id))
                    .await?,
            );
        }
        Ok(stats)
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] for unregistered ids.
    pub fn state(&self, id: &ContainerId) -> Result<LifecycleState> {
        Ok(self.inner.registry.lookup(id)?.state())
    }

    /// Merged launch descriptor, once the prepare pipeline finished.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] for unregistered ids.
    pub fn launch_info(&self, id: &ContainerId) -> Result<Option<ContainerLaunchInfo>> {
        Ok(self.inner.registry.lookup(id)?.record().launch_info.clone())
    }

    /// Init process id, once launched.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::UnknownContainer`] for unregistered ids.
    pub fn pid(&self, id: &ContainerId) -> Result<Option<u32>> {
        Ok(self.inner.registry.lookup(id)?.record().pid)
    }

    /// Ids of every registered container, sorted.
    #[must_use]
    pub fn containers(&self) -> Vec<ContainerId> {
        self.inner.registry.ids()
    }

    /// Subscribes to lifecycle transitions of all containers.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Subscribes to terminations of all containers.
    #[must_use]
    pub fn subscribe_terminations(
        &self,
    ) -> broadcast::Receiver<(ContainerId, ContainerTermination)> {
        self.inner.terminations.subscribe()
    }
}

impl Inner {
    pub fn emit(&self, id: &ContainerId, from: Option<LifecycleState>, to: LifecycleState) {
        tracing::debug!(id = %id, from = ?from, to = %to, "lifecycle transition");
        let _ = self.events.send(LifecycleEvent::now(id.clone(), from, to));
    }

    pub async fn recovery_complete(&self) {
        let mut rx = self.recovered.subscribe();
        if !*rx.borrow() {
            tracing::debug!("launch queued until recovery completes");
        }
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn finish_recovery(&self) {
        let _ = self.recovered.send_replace(true);
    }

    /// Isolators invoked for `id`.
    pub fn eligible(&self, id: &ContainerId) -> Vec<Arc<dyn Isolator>> {
        self.isolators
            .iter()
            .filter(|i| !id.is_nested() || i.supports_nesting())
            .cloned()
            .collect()
    }

    /// Runs one isolator call under the configured time bound.
    pub async fn call<T>(
        &self,
        isolator: &str,
        operation: &'static str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        tracing::debug!(isolator, operation, "isolator call");
        let timeout = self.options.isolator_timeout;
        tokio::time::timeout(timeout, fut).await.unwrap_or_else(|_| {
            Err(IsolonError::IsolatorTimeout {
                isolator: isolator.to_string(),
                operation,
                timeout,
            })
        })
    }

    pub fn transition(&self, entry: &ContainerEntry, to: LifecycleState) -> Result<()> {
        let mut record = entry.record();
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(IsolonError::InvalidTransition {
                id: entry.id.to_string(),
                from,
                to,
            });
        }
        record.state = to;
        self.emit(&entry.id, Some(from), to);
        Ok(())
    }

    /// Enters `DESTROYING`. Returns `false` if another path got there first.
    pub fn begin_destroy(&self, entry: &ContainerEntry, cause: TerminationCause) -> bool {
        let mut record = entry.record();
        let from = record.state;
        if matches!(from, LifecycleState::Destroying | LifecycleState::Terminated) {
            return false;
        }
        record.state = LifecycleState::Destroying;
        if record.cause.is_none() {
            record.cause = Some(cause);
        }
        self.emit(&entry.id, Some(from), LifecycleState::Destroying);
        true
    }

    async fn run_launch(
        self: &Arc<Self>,
        entry: &Arc<ContainerEntry>,
        config: &ContainerConfig,
    ) -> Result<u32> {
        let id = &entry.id;
        let mut merger = LaunchInfoMerger::new();
        for isolator in self.eligible(id) {
            if entry.cancel.is_cancelled() {
                return Err(IsolonError::LaunchCancelled { id: id.to_string() });
            }
            // Registered before the call so a timed-out or cancelled prepare
            // still gets its cleanup.
            entry.record().prepared.push(Arc::clone(&isolator));
            let output = tokio::select! {
                biased;
                () = entry.cancel.cancelled() => {
                    return Err(IsolonError::LaunchCancelled { id: id.to_string() });
                }
                output = self.call(isolator.name(), "prepare", isolator.prepare(id, config)) => output,
            };
            match output {
                Ok(Some(info)) => merger.merge(isolator.name(), info)?,
                Ok(None) => tracing::debug!(id = %id, isolator = isolator.name(), "isolator skipped"),
                Err(err) => {
                    if !matches!(err, IsolonError::IsolatorTimeout { .. }) {
                        let _ = entry.record().prepared.pop();
                    }
                    return Err(err);
                }
            }
        }

        let launch_info = merger.finish();
        self.transition(entry, LifecycleState::Isolating)?;
        entry.record().launch_info = Some(launch_info.clone());

        let launched = tokio::select! {
            biased;
            () = entry.cancel.cancelled() => {
                return Err(IsolonError::LaunchCancelled { id: id.to_string() });
            }
            launched = self.launcher.launch(id, config, &launch_info) => launched,
        };
        let pid = launched?;
        entry.record().pid = Some(pid);

        let prepared = entry.record().prepared.clone();
        for isolator in prepared {
            tokio::select! {
                biased;
                () = entry.cancel.cancelled() => {
                    return Err(IsolonError::LaunchCancelled { id: id.to_string() });
                }
                isolated = self.call(isolator.name(), "isolate", isolator.isolate(id, pid)) => isolated?,
            }
        }
        // The process stays parked until every isolator has placed it.
        if entry.cancel.is_cancelled() {
            return Err(IsolonError::LaunchCancelled { id: id.to_string() });
        }
        self.launcher.release(id)?;

        self.transition(entry, LifecycleState::Running)?;
        self.checkpoint(entry);
        self.spawn_exit_waiter(entry, pid);
        Ok(pid)
    }

    /// Destroys `entry`, or waits for the teardown already in progress.
    pub fn destroy_entry(
        self: &Arc<Self>,
        entry: Arc<ContainerEntry>,
        cause: TerminationCause,
    ) -> BoxFuture<ContainerTermination> {
        let inner = Arc::clone(self);
        Box::pin(async move {
            if inner.begin_destroy(&entry, cause) {
                entry.cancel.cancel();
                let _guard = entry.op.lock().await;
                inner.teardown(&entry).await
            } else {
                entry.terminated().await
            }
        })
    }

    /// Runs cleanup for a container in `DESTROYING`. The caller holds `op`.
    pub async fn teardown(self: &Arc<Self>, entry: &Arc<ContainerEntry>) -> ContainerTermination {
        let id = &entry.id;
        let children = self.registry.children(id);
        if !children.is_empty() {
            tracing::info!(id = %id, children = children.len(), "destroying nested containers");
            for child in children {
                let _ = self.destroy_entry(child, TerminationCause::Request).await;
            }
        }

        entry.cancel.cancel();
        let prepared: Vec<_> = entry.record().prepared.iter().rev().cloned().collect();
        for isolator in prepared {
            if let Err(err) = self
                .call(isolator.name(), "cleanup", isolator.cleanup(id))
                .await
            {
                let failure = IsolonError::CleanupFailure {
                    isolator: isolator.name().to_string(),
                    id: id.to_string(),
                    message: err.to_string(),
                };
                tracing::warn!(id = %id, error = %failure, "cleanup failed");
            }
        }
        entry.monitor.cancel();

        // A launch cancelled mid-call never stored the pid it got.
        let pid = entry.record().pid.or_else(|| self.launcher.pid(id));
        let status = match pid {
            Some(pid) => match self.launcher.reap(id, pid).await {
                Ok(status) => Some(status),
                Err(err) => {
                    tracing::warn!(id = %id, pid, error = %err, "failed to reap container");
                    None
                }
            },
            None => None,
        };

        let until = entry.record().coalesce_until;
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }

        let termination = {
            let record = entry.record();
            if !record.late_limitations.is_empty() {
                tracing::debug!(
                    id = %id,
                    count = record.late_limitations.len(),
                    "limitations ignored after destroy began"
                );
            }
            let cause = record.cause.clone().unwrap_or(TerminationCause::Request);
            termination::build(&cause, record.limitation.as_ref(), status)
        };
        if let Err(err) = self.transition(entry, LifecycleState::Terminated) {
            tracing::warn!(id = %id, error = %err, "unexpected state at termination");
        }
        self.registry.remove(id);
        self.prune_checkpoint(id);
        entry.publish(termination.clone());
        let _ = self.terminations.send((id.clone(), termination.clone()));
        tracing::info!(
            id = %id,
            state = ?termination.state,
            reasons = ?termination.reasons,
            message = %termination.message,
            "container terminated"
        );
        termination
    }

    /// Records a limitation and, the first time, starts the destroy path.
    ///
    /// Limitations arriving within one monitor interval of the first are
    /// folded in by [`Inner::coalesce_limitation`]; teardown waits for that
    /// interval to close before it builds the termination.
    pub fn limit(self: &Arc<Self>, entry: &Arc<ContainerEntry>, limitation: ContainerLimitation) {
        {
            let mut record = entry.record();
            if record.state != LifecycleState::Running {
                tracing::warn!(
                    id = %entry.id,
                    state = %record.state,
                    message = %limitation.message,
                    "limitation after destroy began, recorded for diagnostics"
                );
                record.late_limitations.push(limitation);
                return;
            }
            record.state = LifecycleState::Limited;
            self.emit(&entry.id, Some(LifecycleState::Running), LifecycleState::Limited);
            tracing::info!(id = %entry.id, message = %limitation.message, "container limited");
            record.limitation = Some(limitation);
            record.coalesce_until = Some(tokio::time::Instant::now() + self.options.monitor_interval);
            record.cause = Some(TerminationCause::Limitation);
        }
        drop(tokio::spawn(
            self.destroy_entry(Arc::clone(entry), TerminationCause::Limitation),
        ));
    }

    /// Folds `next` into the recorded limitation while its interval is open.
    pub fn coalesce_limitation(&self, entry: &ContainerEntry, next: ContainerLimitation) {
        let mut guard = entry.record();
        let record = &mut *guard;
        let open = record
            .coalesce_until
            .is_some_and(|until| tokio::time::Instant::now() < until);
        match (&mut record.limitation, open) {
            (Some(first), true) => monitor::coalesce(first, next),
            _ => {
                tracing::warn!(
                    id = %entry.id,
                    message = %next.message,
                    "limitation after destroy began, recorded for diagnostics"
                );
                record.late_limitations.push(next);
            }
        }
    }

    pub fn spawn_exit_waiter(self: &Arc<Self>, entry: &Arc<ContainerEntry>, pid: u32) {
        let inner = Arc::clone(self);
        let entry = Arc::clone(entry);
        drop(tokio::spawn(async move {
            match inner.launcher.wait(&entry.id, pid).await {
                Ok(status) => tracing::info!(id = %entry.id, status = %status, "container exited"),
                Err(err) => tracing::warn!(id = %entry.id, error = %err, "lost track of container process"),
            }
            if inner.begin_destroy(&entry, TerminationCause::Exited) {
                let _guard = entry.op.lock().await;
                let _ = inner.teardown(&entry).await;
            }
        }));
    }

    pub fn checkpoint(&self, entry: &ContainerEntry) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        let state = {
            let record = entry.record();
            ContainerState {
                executor_info: record.executor.clone(),
                container_id: entry.id.clone(),
                pid: record.pid.unwrap_or_default(),
                directory: record.directory.clone(),
            }
        };
        if let Err(err) = store.save(&state) {
            tracing::warn!(id = %entry.id, error = %err, "failed to checkpoint container");
        }
    }

    fn prune_checkpoint(&self, id: &ContainerId) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        if let Err(err) = store.remove(id) {
            tracing::warn!(id = %id, error = %err, "failed to prune checkpoint");
        }
    }
}

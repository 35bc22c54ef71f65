//! Scripted isolators and an in-memory launcher shared by the runtime tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{
    CommandInfo, ContainerConfig, ContainerLaunchInfo, ContainerLimitation, ContainerRecoverInfo,
    ContainerState, ExitStatus,
};
use isolon_common::resources::{ResourceStatistics, Resources};
use isolon_common::types::{ContainerId, LifecycleState};
use isolon_core::isolator::{IsolationStage, Isolator, LimitationFeed, LimitationSender};
use isolon_runtime::{Containerizer, ContainerizerOptions, Launcher};
use tokio::sync::watch;

// ── Scripted isolator ────────────────────────────────────────────────

/// Calls across several isolators, in the order they happened, as `name:op`.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Isolator whose behavior is fixed up front and whose calls are recorded.
pub struct ScriptedIsolator {
    name: String,
    stage: IsolationStage,
    nesting: bool,
    output: Option<ContainerLaunchInfo>,
    skip_debug: bool,
    delay: Option<Duration>,
    fail_prepare: bool,
    fail_isolate: bool,
    fail_cleanup: bool,
    cleanup_delay: Option<Duration>,
    fail_recover: Vec<ContainerId>,
    stats: ResourceStatistics,
    feeds: DashMap<ContainerId, LimitationSender>,
    calls: Mutex<Vec<String>>,
    journal: Option<Journal>,
}

impl ScriptedIsolator {
    pub fn new(name: &str, stage: IsolationStage) -> Self {
        Self {
            name: name.to_string(),
            stage,
            nesting: false,
            output: None,
            skip_debug: false,
            delay: None,
            fail_prepare: false,
            fail_isolate: false,
            fail_cleanup: false,
            cleanup_delay: None,
            fail_recover: Vec::new(),
            stats: ResourceStatistics::default(),
            feeds: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    pub fn output(mut self, info: ContainerLaunchInfo) -> Self {
        self.output = Some(info);
        self
    }

    pub const fn nesting(mut self) -> Self {
        self.nesting = true;
        self
    }

    pub const fn skip_debug(mut self) -> Self {
        self.skip_debug = true;
        self
    }

    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub const fn failing(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub const fn failing_isolate(mut self) -> Self {
        self.fail_isolate = true;
        self
    }

    pub const fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub const fn cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = Some(delay);
        self
    }

    pub fn journal(mut self, journal: &Journal) -> Self {
        self.journal = Some(Arc::clone(journal));
        self
    }

    pub fn failing_recover(mut self, id: &ContainerId) -> Self {
        self.fail_recover.push(id.clone());
        self
    }

    pub fn stats(mut self, stats: ResourceStatistics) -> Self {
        self.stats = stats;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn record(&self, op: &str, id: &ContainerId) {
        self.calls.lock().unwrap().push(format!("{op}:{id}"));
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(format!("{}:{op}", self.name));
        }
    }

    /// Every recorded call as `op:id`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of `op` calls for `id`.
    pub fn count(&self, op: &str, id: &ContainerId) -> usize {
        let call = format!("{op}:{id}");
        self.calls().iter().filter(|c| **c == call).count()
    }

    /// Pushes a limitation into the container's feed.
    pub async fn limit(&self, id: &ContainerId, limitation: ContainerLimitation) -> bool {
        let sender = self.feeds.get(id).map(|s| s.clone());
        match sender {
            Some(sender) => sender.send(limitation).await,
            None => false,
        }
    }
}

#[async_trait]
impl Isolator for ScriptedIsolator {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage(&self) -> IsolationStage {
        self.stage
    }

    fn supports_nesting(&self) -> bool {
        self.nesting
    }

    async fn recover(&self, state: &ContainerState) -> Result<()> {
        self.record("recover", &state.container_id);
        if self.fail_recover.contains(&state.container_id) {
            return Err(IsolonError::RecoveryMismatch {
                isolator: self.name.clone(),
                id: state.container_id.to_string(),
                message: "scripted mismatch".into(),
            });
        }
        Ok(())
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        self.record("prepare", id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_prepare {
            return Err(IsolonError::isolator(&self.name, "prepare", "scripted failure"));
        }
        if self.skip_debug && config.is_debug() {
            return Ok(None);
        }
        Ok(self.output.clone())
    }

    async fn isolate(&self, id: &ContainerId, _pid: u32) -> Result<()> {
        self.record("isolate", id);
        if self.fail_isolate {
            return Err(IsolonError::isolator(&self.name, "isolate", "scripted failure"));
        }
        Ok(())
    }

    fn watch(&self, id: &ContainerId) -> LimitationFeed {
        self.record("watch", id);
        let (tx, feed) = LimitationFeed::channel(64);
        let _ = self.feeds.insert(id.clone(), tx);
        feed
    }

    async fn update(&self, id: &ContainerId, _resources: &Resources) -> Result<()> {
        self.record("update", id);
        Ok(())
    }

    async fn usage(&self, id: &ContainerId) -> Result<ResourceStatistics> {
        self.record("usage", id);
        Ok(self.stats.clone())
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        self.record("cleanup", id);
        let _ = self.feeds.remove(id);
        if let Some(delay) = self.cleanup_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_cleanup {
            return Err(IsolonError::isolator(&self.name, "cleanup", "scripted failure"));
        }
        Ok(())
    }
}

// ── In-memory launcher ───────────────────────────────────────────────

/// Launcher that hands out fake pids; processes "run" until reaped or
/// told to exit.
#[derive(Default)]
pub struct MockLauncher {
    next_pid: AtomicU32,
    fail: AtomicBool,
    launch_delay: Mutex<Option<Duration>>,
    exits: DashMap<ContainerId, watch::Sender<Option<ExitStatus>>>,
    pids: DashMap<ContainerId, u32>,
    launched: Mutex<Vec<(ContainerId, ContainerLaunchInfo)>>,
    reaped: Mutex<Vec<ContainerId>>,
    released: Mutex<Vec<ContainerId>>,
}

impl MockLauncher {
    pub fn new() -> Arc<Self> {
        let launcher = Self::default();
        launcher.next_pid.store(1000, Ordering::SeqCst);
        Arc::new(launcher)
    }

    pub fn fail_launches(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Makes every later launch take `delay` before it returns.
    pub fn delay_launches(&self, delay: Duration) {
        *self.launch_delay.lock().unwrap() = Some(delay);
    }

    /// Makes the container's process exit on its own.
    pub fn exit(&self, id: &ContainerId, status: ExitStatus) {
        let _ = self.channel(id).send_replace(Some(status));
    }

    pub fn launched(&self) -> Vec<(ContainerId, ContainerLaunchInfo)> {
        self.launched.lock().unwrap().clone()
    }

    pub fn reaped(&self) -> Vec<ContainerId> {
        self.reaped.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<ContainerId> {
        self.released.lock().unwrap().clone()
    }

    fn channel(&self, id: &ContainerId) -> watch::Sender<Option<ExitStatus>> {
        self.exits
            .entry(id.clone())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(
        &self,
        id: &ContainerId,
        _config: &ContainerConfig,
        launch_info: &ContainerLaunchInfo,
    ) -> Result<u32> {
        let delay = *self.launch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(IsolonError::Launcher {
                message: "scripted launcher failure".into(),
            });
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let _ = self.pids.insert(id.clone(), pid);
        let _ = self.channel(id);
        self.launched
            .lock()
            .unwrap()
            .push((id.clone(), launch_info.clone()));
        Ok(pid)
    }

    async fn wait(&self, id: &ContainerId, _pid: u32) -> Result<ExitStatus> {
        let mut rx = self.channel(id).subscribe();
        let status = rx
            .wait_for(Option::is_some)
            .await
            .map(|s| s.unwrap_or_default())
            .unwrap_or_default();
        Ok(status)
    }

    async fn reap(&self, id: &ContainerId, _pid: u32) -> Result<ExitStatus> {
        self.reaped.lock().unwrap().push(id.clone());
        let tx = self.channel(id);
        let _ = tx.send_if_modified(|status| {
            if status.is_some() {
                return false;
            }
            *status = Some(ExitStatus::signaled(9, false));
            true
        });
        let status = tx.borrow().unwrap_or_default();
        Ok(status)
    }

    fn release(&self, id: &ContainerId) -> Result<()> {
        self.released.lock().unwrap().push(id.clone());
        Ok(())
    }

    fn pid(&self, id: &ContainerId) -> Option<u32> {
        self.pids.get(id).map(|p| *p)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

pub fn options() -> ContainerizerOptions {
    ContainerizerOptions {
        isolator_timeout: Duration::from_secs(2),
        monitor_interval: Duration::from_millis(20),
        runtime_dir: std::env::temp_dir().join("isolon-tests"),
        checkpoint_file: None,
    }
}

pub fn isolators(list: &[&Arc<ScriptedIsolator>]) -> Vec<Arc<dyn Isolator>> {
    list.iter()
        .map(|i| Arc::clone(*i) as Arc<dyn Isolator>)
        .collect()
}

/// A containerizer that already went through an empty recovery.
pub async fn ready(
    isolators: Vec<Arc<dyn Isolator>>,
    launcher: &Arc<MockLauncher>,
    options: ContainerizerOptions,
) -> Containerizer {
    let containerizer = Containerizer::new(isolators, Arc::clone(launcher) as Arc<dyn Launcher>, options);
    let _ = containerizer
        .recover(ContainerRecoverInfo::default())
        .await
        .expect("empty recovery");
    containerizer
}

pub fn config(id: &ContainerId) -> ContainerConfig {
    ContainerConfig::builder(CommandInfo::shell("sleep 1000"), "/tmp/isolon-sandbox")
        .id(id.clone())
        .build()
        .expect("valid config")
}

pub fn state(id: &ContainerId, pid: u32) -> ContainerState {
    ContainerState {
        executor_info: None,
        container_id: id.clone(),
        pid,
        directory: "/tmp/isolon-sandbox".into(),
    }
}

/// Polls until `check` holds, for at most two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(check(), "condition not reached in time");
}

pub fn is_state(containerizer: &Containerizer, id: &ContainerId, state: LifecycleState) -> bool {
    containerizer.state(id).is_ok_and(|s| s == state)
}

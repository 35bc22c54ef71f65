//! Cgroup-backed isolators for CPU and memory.
//!
//! Both isolators share the container's unified-hierarchy cgroup: each
//! creates it on demand and each removes it on cleanup, whichever runs last
//! finding nothing left to do. DEBUG containers are never placed in a cgroup.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerConfig, ContainerLaunchInfo, ContainerLimitation, ContainerState};
use isolon_common::resources::{MEM, Resource, ResourceStatistics, Resources};
use isolon_common::types::{ContainerId, TaskStatusReason};
use tokio_util::sync::CancellationToken;

use super::{CgroupManager, cpu, memory};
use crate::isolator::{IsolationStage, Isolator, LimitationFeed};

const FEED_CAPACITY: usize = 8;

fn recovery_mismatch(isolator: &str, state: &ContainerState, cgroup: &CgroupManager) -> IsolonError {
    IsolonError::RecoveryMismatch {
        isolator: isolator.to_string(),
        id: state.container_id.to_string(),
        message: format!("cgroup {} is missing", cgroup.path().display()),
    }
}

/// Applies `cpus` shares as `cpu.weight`.
#[derive(Debug)]
pub struct CgroupCpuIsolator {
    root: PathBuf,
    containers: DashMap<ContainerId, CgroupManager>,
}

impl CgroupCpuIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "cgroups/cpu";

    /// Creates the isolator rooted at the given cgroup mount point.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            containers: DashMap::new(),
        }
    }
}

#[async_trait]
impl Isolator for CgroupCpuIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Resource
    }

    async fn recover(&self, state: &ContainerState) -> Result<()> {
        let cgroup = CgroupManager::for_container(&self.root, &state.container_id);
        if !cgroup.exists() {
            return Err(recovery_mismatch(Self::NAME, state, &cgroup));
        }
        let _ = self.containers.insert(state.container_id.clone(), cgroup);
        Ok(())
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        if config.is_debug() {
            tracing::debug!(id = %id, "debug container, skipping cpu cgroup");
            return Ok(None);
        }
        let cgroup = CgroupManager::for_container(&self.root, id);
        cgroup.create()?;
        if let Some(weight) = cpu::weight_for(&config.resources) {
            cpu::set_cpu_weight(cgroup.path(), weight)?;
        }
        let _ = self.containers.insert(id.clone(), cgroup);
        Ok(None)
    }

    async fn isolate(&self, id: &ContainerId, pid: u32) -> Result<()> {
        let Some(cgroup) = self.containers.get(id).map(|c| c.clone()) else {
            return Ok(());
        };
        cgroup.add_process(pid)
    }

    async fn update(&self, id: &ContainerId, resources: &Resources) -> Result<()> {
        let Some(cgroup) = self.containers.get(id).map(|c| c.clone()) else {
            return Ok(());
        };
        if let Some(weight) = cpu::weight_for(resources) {
            cpu::set_cpu_weight(cgroup.path(), weight)?;
        }
        Ok(())
    }

    async fn usage(&self, id: &ContainerId) -> Result<ResourceStatistics> {
        let Some(cgroup) = self.containers.get(id).map(|c| c.clone()) else {
            return Ok(ResourceStatistics::default());
        };
        Ok(ResourceStatistics {
            cpu_usage_usec: cpu::usage_usec(cgroup.path())?,
            cpu_weight: cpu::cpu_weight(cgroup.path())?,
            ..ResourceStatistics::default()
        })
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        let _ = self.containers.remove(id);
        CgroupManager::for_container(&self.root, id).destroy().await
    }
}

#[derive(Debug)]
struct MemoryState {
    cgroup: CgroupManager,
    resources: Resources,
    oom_baseline: u64,
    poller: Option<CancellationToken>,
}

/// Applies `mem` shares as `memory.max` and reports OOM kills as limitations.
#[derive(Debug)]
pub struct CgroupMemoryIsolator {
    root: PathBuf,
    interval: Duration,
    containers: DashMap<ContainerId, MemoryState>,
}

impl CgroupMemoryIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "cgroups/mem";

    /// Creates the isolator; `interval` is how often `memory.events` is polled.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            interval,
            containers: DashMap::new(),
        }
    }
}

fn oom_limitation(resources: &Resources, cgroup: &CgroupManager, kills: u64) -> ContainerLimitation {
    let (_, peak) = memory::usage(cgroup.path()).unwrap_or((None, None));
    let mut limited = resources.named(MEM);
    if limited.is_empty() {
        if let Ok(Some(max)) = memory::memory_max(cgroup.path()) {
            #[allow(clippy::cast_precision_loss)]
            limited.push(Resource::scalar(MEM, max as f64 / (1024.0 * 1024.0)));
        }
    }
    let requested = limited
        .scalar(MEM)
        .map_or_else(|| "unlimited".to_string(), |mb| format!("{mb}MB"));
    let used = peak.map_or_else(
        || "unknown".to_string(),
        |bytes| format!("{}MB", bytes / (1024 * 1024)),
    );
    ContainerLimitation::new(
        limited,
        format!("Memory limit exceeded: Requested: {requested} Maximum Used: {used} (oom_kill {kills})"),
        Some(TaskStatusReason::ContainerLimitationMemory),
    )
}

#[async_trait]
impl Isolator for CgroupMemoryIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Resource
    }

    async fn recover(&self, state: &ContainerState) -> Result<()> {
        let cgroup = CgroupManager::for_container(&self.root, &state.container_id);
        if !cgroup.exists() {
            return Err(recovery_mismatch(Self::NAME, state, &cgroup));
        }
        let oom_baseline = memory::oom_kills(cgroup.path())?;
        let _ = self.containers.insert(
            state.container_id.clone(),
            MemoryState {
                cgroup,
                resources: Resources::new(),
                oom_baseline,
                poller: None,
            },
        );
        Ok(())
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        if config.is_debug() {
            tracing::debug!(id = %id, "debug container, skipping memory cgroup");
            return Ok(None);
        }
        let cgroup = CgroupManager::for_container(&self.root, id);
        cgroup.create()?;
        if let Some(bytes) = memory::limit_bytes(&config.resources) {
            memory::set_memory_max(cgroup.path(), bytes)?;
        }
        let oom_baseline = memory::oom_kills(cgroup.path())?;
        let _ = self.containers.insert(
            id.clone(),
            MemoryState {
                cgroup,
                resources: config.resources.clone(),
                oom_baseline,
                poller: None,
            },
        );
        Ok(None)
    }

    async fn isolate(&self, id: &ContainerId, pid: u32) -> Result<()> {
        let Some(cgroup) = self.containers.get(id).map(|s| s.cgroup.clone()) else {
            return Ok(());
        };
        cgroup.add_process(pid)
    }

    fn watch(&self, id: &ContainerId) -> LimitationFeed {
        let Some(mut state) = self.containers.get_mut(id) else {
            return LimitationFeed::closed();
        };
        if let Some(previous) = state.poller.take() {
            previous.cancel();
        }

        let (tx, feed) = LimitationFeed::channel(FEED_CAPACITY);
        let token = CancellationToken::new();
        state.poller = Some(token.clone());

        let cgroup = state.cgroup.clone();
        let resources = state.resources.clone();
        let mut seen = state.oom_baseline;
        let interval = self.interval;
        let id = id.clone();
        drop(state);

        drop(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match memory::oom_kills(cgroup.path()) {
                    Ok(kills) if kills > seen => {
                        seen = kills;
                        tracing::info!(id = %id, kills, "OOM kill observed");
                        if !tx.send(oom_limitation(&resources, &cgroup, kills)).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(id = %id, error = %e, "failed to read memory events"),
                }
            }
            tracing::debug!(id = %id, "memory limitation poller stopped");
        }));
        feed
    }

    async fn update(&self, id: &ContainerId, resources: &Resources) -> Result<()> {
        let Some(mut state) = self.containers.get_mut(id) else {
            return Ok(());
        };
        if let Some(bytes) = memory::limit_bytes(resources) {
            memory::set_memory_max(state.cgroup.path(), bytes)?;
        }
        state.resources = resources.clone();
        Ok(())
    }

    async fn usage(&self, id: &ContainerId) -> Result<ResourceStatistics> {
        let Some(cgroup) = self.containers.get(id).map(|s| s.cgroup.clone()) else {
            return Ok(ResourceStatistics::default());
        };
        let (current, peak) = memory::usage(cgroup.path())?;
        Ok(ResourceStatistics {
            memory_current_bytes: current,
            memory_peak_bytes: peak,
            memory_limit_bytes: memory::memory_max(cgroup.path())?,
            oom_kills: Some(memory::oom_kills(cgroup.path())?),
            ..ResourceStatistics::default()
        })
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        if let Some((_, state)) = self.containers.remove(id) {
            if let Some(poller) = state.poller {
                poller.cancel();
            }
        }
        CgroupManager::for_container(&self.root, id).destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::protocol::CommandInfo;
    use isolon_common::resources::CPUS;
    use isolon_common::types::ContainerClass;

    fn config(class: ContainerClass) -> ContainerConfig {
        ContainerConfig::builder(CommandInfo::shell("true"), "/sandbox")
            .resources(
                Resources::new()
                    .with(Resource::scalar(CPUS, 2.0))
                    .with(Resource::scalar(MEM, 512.0)),
            )
            .class(class)
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn prepare_writes_limits_and_cleanup_removes_cgroup() {
        let root = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("c1");
        let cpu = CgroupCpuIsolator::new(root.path());
        let mem = CgroupMemoryIsolator::new(root.path(), Duration::from_millis(10));

        assert!(cpu.prepare(&id, &config(ContainerClass::Default)).await.expect("cpu").is_none());
        assert!(mem.prepare(&id, &config(ContainerClass::Default)).await.expect("mem").is_none());

        let cg = CgroupManager::for_container(root.path(), &id);
        assert_eq!(cpu::cpu_weight(cg.path()).expect("weight"), Some(200));
        assert_eq!(memory::memory_max(cg.path()).expect("max"), Some(512 * 1024 * 1024));

        mem.isolate(&id, 77).await.expect("isolate");
        assert_eq!(super::super::read_u64(cg.path(), "cgroup.procs").expect("procs"), Some(77));

        mem.cleanup(&id).await.expect("mem cleanup");
        cpu.cleanup(&id).await.expect("cpu cleanup");
        assert!(!cg.exists());
    }

    #[tokio::test]
    async fn debug_class_skips_cgroup() {
        let root = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("dbg");
        let mem = CgroupMemoryIsolator::new(root.path(), Duration::from_millis(10));
        assert!(mem.prepare(&id, &config(ContainerClass::Debug)).await.expect("prepare").is_none());
        assert!(!CgroupManager::for_container(root.path(), &id).exists());
        mem.cleanup(&id).await.expect("cleanup tolerates unprepared");
    }

    #[tokio::test]
    async fn oom_kill_is_reported_as_memory_limitation() {
        let root = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("oom");
        let mem = CgroupMemoryIsolator::new(root.path(), Duration::from_millis(10));
        let _ = mem.prepare(&id, &config(ContainerClass::Default)).await.expect("prepare");

        let mut feed = mem.watch(&id);
        let cg = CgroupManager::for_container(root.path(), &id);
        std::fs::write(cg.path().join("memory.events"), "oom 1\noom_kill 1\n").expect("write");

        let limitation = tokio::time::timeout(Duration::from_secs(2), feed.next())
            .await
            .expect("limitation within timeout")
            .expect("feed open");
        assert_eq!(limitation.reason, Some(TaskStatusReason::ContainerLimitationMemory));
        assert_eq!(limitation.resources.scalar(MEM), Some(512.0));

        mem.cleanup(&id).await.expect("cleanup");
        let end = tokio::time::timeout(Duration::from_secs(2), feed.next())
            .await
            .expect("feed closes after cleanup");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn recover_requires_existing_cgroup() {
        let root = tempfile::tempdir().expect("tempdir");
        let cpu = CgroupCpuIsolator::new(root.path());
        let state = ContainerState {
            executor_info: None,
            container_id: ContainerId::new("gone"),
            pid: 1,
            directory: "/sandbox".into(),
        };
        assert!(matches!(
            cpu.recover(&state).await,
            Err(IsolonError::RecoveryMismatch { .. })
        ));

        CgroupManager::for_container(root.path(), &state.container_id)
            .create()
            .expect("create");
        cpu.recover(&state).await.expect("recovers existing cgroup");
    }

    #[tokio::test]
    async fn update_rewrites_memory_max() {
        let root = tempfile::tempdir().expect("tempdir");
        let id = ContainerId::new("upd");
        let mem = CgroupMemoryIsolator::new(root.path(), Duration::from_millis(10));
        let _ = mem.prepare(&id, &config(ContainerClass::Default)).await.expect("prepare");
        mem.update(&id, &Resources::new().with(Resource::scalar(MEM, 1024.0)))
            .await
            .expect("update");
        let stats = mem.usage(&id).await.expect("usage");
        assert_eq!(stats.memory_limit_bytes, Some(1024 * 1024 * 1024));
        assert_eq!(stats.oom_kills, Some(0));
    }
}

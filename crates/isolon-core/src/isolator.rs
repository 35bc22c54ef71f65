//! The isolator capability contract.
//!
//! Every isolation concern (namespaces, cgroups, filesystem roots,
//! capabilities, rlimits, network) is an [`Isolator`]. The containerizer
//! orders isolators by their declared [`IsolationStage`], calls `prepare`
//! sequentially, merges the partial launch infos, and later drives
//! `isolate`, `watch`, and `cleanup` for the same container.

use std::fmt;

use async_trait::async_trait;
use isolon_common::error::Result;
use isolon_common::protocol::{
    ContainerConfig, ContainerLaunchInfo, ContainerLimitation, ContainerState,
};
use isolon_common::resources::{ResourceStatistics, Resources};
use isolon_common::types::ContainerId;
use tokio::sync::mpsc;

/// Declared position of an isolator in the prepare pipeline.
///
/// Namespace entry must happen before other isolators can assume
/// process-local semantics, so stages are ordered namespaces first. Ties
/// inside a stage are broken by isolator name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IsolationStage {
    /// Namespace creation or entry.
    Namespace,
    /// Root filesystem and mounts.
    Filesystem,
    /// Network namespace plumbing.
    Network,
    /// Cgroup resource limits.
    Resource,
    /// Capabilities and rlimits applied last.
    Security,
}

impl fmt::Display for IsolationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Namespace => "namespace",
            Self::Filesystem => "filesystem",
            Self::Network => "network",
            Self::Resource => "resource",
            Self::Security => "security",
        };
        f.write_str(name)
    }
}

/// A pluggable unit applying one resource-isolation concern to containers.
#[async_trait]
pub trait Isolator: Send + Sync {
    /// Stable name used in logs, errors, and configuration.
    fn name(&self) -> &str;

    /// Pipeline stage this isolator runs in.
    fn stage(&self) -> IsolationStage;

    /// Whether this isolator is invoked for nested containers.
    fn supports_nesting(&self) -> bool {
        false
    }

    /// Reconstructs isolation context for a container that existed before a
    /// restart.
    ///
    /// Orphans arrive without `executor_info`; implementations must not
    /// require it.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::RecoveryMismatch`](isolon_common::error::IsolonError::RecoveryMismatch)
    /// when the live state does not match.
    async fn recover(&self, _state: &ContainerState) -> Result<()> {
        Ok(())
    }

    /// Prepares isolation for a new container.
    ///
    /// Returns the fields this isolator contributes to the launch, or `None`
    /// when it has nothing to add (e.g. it skips this container class).
    ///
    /// # Errors
    ///
    /// Any error aborts the launch; already prepared isolators are cleaned up.
    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>>;

    /// Places the launched init process under this isolator's control.
    ///
    /// # Errors
    ///
    /// Any error triggers the destroy path for the container.
    async fn isolate(&self, _id: &ContainerId, _pid: u32) -> Result<()> {
        Ok(())
    }

    /// Subscribes to limitations for a container.
    ///
    /// The feed is lazy and stays open until `cleanup` releases the
    /// container. Isolators that never limit return [`LimitationFeed::closed`].
    fn watch(&self, _id: &ContainerId) -> LimitationFeed {
        LimitationFeed::closed()
    }

    /// Applies new resource shares to a running container.
    ///
    /// # Errors
    ///
    /// Returns an error if the new limits cannot be written.
    async fn update(&self, _id: &ContainerId, _resources: &Resources) -> Result<()> {
        Ok(())
    }

    /// Reports usage for the subsystems this isolator controls.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be read.
    async fn usage(&self, _id: &ContainerId) -> Result<ResourceStatistics> {
        Ok(ResourceStatistics::default())
    }

    /// Releases everything this isolator holds for the container and closes
    /// its limitation feed.
    ///
    /// Must tolerate containers it never prepared.
    ///
    /// # Errors
    ///
    /// Errors are logged by the containerizer and never propagated.
    async fn cleanup(&self, id: &ContainerId) -> Result<()>;
}

/// Sorts isolators into pipeline order: by stage, then by name.
pub fn sort_by_stage(isolators: &mut [std::sync::Arc<dyn Isolator>]) {
    isolators.sort_by(|a, b| {
        a.stage()
            .cmp(&b.stage())
            .then_with(|| a.name().cmp(b.name()))
    });
}

/// Sending half of a limitation feed, held by the isolator.
#[derive(Debug, Clone)]
pub struct LimitationSender {
    tx: mpsc::Sender<ContainerLimitation>,
}

impl LimitationSender {
    /// Publishes a limitation. Returns `false` once the feed was dropped.
    pub async fn send(&self, limitation: ContainerLimitation) -> bool {
        self.tx.send(limitation).await.is_ok()
    }

    /// Returns whether the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Lazy sequence of limitations for one container.
///
/// Yields `None` once the isolator released the container.
#[derive(Debug)]
pub struct LimitationFeed {
    rx: mpsc::Receiver<ContainerLimitation>,
}

impl LimitationFeed {
    /// Creates a connected sender/feed pair.
    #[must_use]
    pub fn channel(capacity: usize) -> (LimitationSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (LimitationSender { tx }, Self { rx })
    }

    /// A feed that never yields a limitation.
    #[must_use]
    pub fn closed() -> Self {
        let (_, feed) = Self::channel(1);
        feed
    }

    /// Waits for the next limitation.
    pub async fn next(&mut self) -> Option<ContainerLimitation> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_feed_ends_immediately() {
        let mut feed = LimitationFeed::closed();
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn feed_ends_when_sender_dropped() {
        let (tx, mut feed) = LimitationFeed::channel(4);
        assert!(
            tx.send(ContainerLimitation::new(Resources::new(), "oom", None))
                .await
        );
        drop(tx);
        assert_eq!(feed.next().await.map(|l| l.message), Some("oom".into()));
        assert!(feed.next().await.is_none());
    }

    #[test]
    fn stages_order_namespaces_first() {
        assert!(IsolationStage::Namespace < IsolationStage::Filesystem);
        assert!(IsolationStage::Filesystem < IsolationStage::Resource);
        assert!(IsolationStage::Resource < IsolationStage::Security);
    }
}

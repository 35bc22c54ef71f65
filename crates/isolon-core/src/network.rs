//! Network namespace isolation for top-level containers.
//!
//! Nested containers share their parent's network namespace and never
//! reach this isolator.

use async_trait::async_trait;
use isolon_common::error::Result;
use isolon_common::protocol::{CommandInfo, ContainerConfig, ContainerLaunchInfo, NetworkMode};
use isolon_common::types::{ContainerId, Namespace};

use crate::isolator::{IsolationStage, Isolator};

/// Gives bridged containers a private network namespace with loopback up.
#[derive(Debug, Clone, Copy)]
pub struct NetworkIsolator {
    default_mode: NetworkMode,
}

impl NetworkIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "network";

    /// Creates the isolator; `default_mode` applies when a container does
    /// not request a mode.
    #[must_use]
    pub const fn new(default_mode: NetworkMode) -> Self {
        Self { default_mode }
    }
}

#[async_trait]
impl Isolator for NetworkIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Network
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let mode = config
            .container_info
            .as_ref()
            .and_then(|c| c.network)
            .unwrap_or(self.default_mode);
        tracing::debug!(id = %id, mode = ?mode, "network mode selected");
        match mode {
            NetworkMode::Host => Ok(None),
            NetworkMode::Bridge => Ok(Some(ContainerLaunchInfo {
                clone_namespaces: vec![Namespace::Network],
                pre_exec_commands: vec![CommandInfo::argv(["ip", "link", "set", "lo", "up"])],
                ..ContainerLaunchInfo::default()
            })),
        }
    }

    async fn cleanup(&self, _id: &ContainerId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::protocol::ContainerInfo;

    fn config(network: Option<NetworkMode>) -> ContainerConfig {
        ContainerConfig::builder(CommandInfo::shell("true"), "/sandbox")
            .container_info(ContainerInfo {
                network,
                ..ContainerInfo::default()
            })
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn host_mode_contributes_nothing() {
        let isolator = NetworkIsolator::new(NetworkMode::Host);
        let id = ContainerId::new("c");
        assert!(isolator.prepare(&id, &config(None)).await.expect("prepare").is_none());
    }

    #[tokio::test]
    async fn requested_bridge_overrides_default() {
        let isolator = NetworkIsolator::new(NetworkMode::Host);
        let info = isolator
            .prepare(&ContainerId::new("c"), &config(Some(NetworkMode::Bridge)))
            .await
            .expect("prepare")
            .expect("info");
        assert_eq!(info.clone_namespaces, vec![Namespace::Network]);
        assert_eq!(info.pre_exec_commands.len(), 1);
    }
}

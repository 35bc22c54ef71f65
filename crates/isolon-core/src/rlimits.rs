//! Process resource limits.

use async_trait::async_trait;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerConfig, ContainerLaunchInfo};
use isolon_common::types::ContainerId;

use crate::isolator::{IsolationStage, Isolator};

/// Passes validated rlimits through to the launcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct RlimitsIsolator;

impl RlimitsIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "rlimits";
}

#[async_trait]
impl Isolator for RlimitsIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Security
    }

    fn supports_nesting(&self) -> bool {
        true
    }

    async fn prepare(
        &self,
        _id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let rlimits = config.container_info_or_default().rlimits;
        if rlimits.is_empty() {
            return Ok(None);
        }
        if let Some((kind, _)) = rlimits.iter().find(|(_, l)| !l.is_consistent()) {
            return Err(IsolonError::isolator(
                Self::NAME,
                "prepare",
                format!("{kind:?}: soft limit exceeds hard limit"),
            ));
        }
        Ok(Some(ContainerLaunchInfo {
            rlimits,
            ..ContainerLaunchInfo::default()
        }))
    }

    async fn cleanup(&self, _id: &ContainerId) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::protocol::{CommandInfo, ContainerInfo, Rlimit};
    use isolon_common::types::RlimitKind;

    fn config(limit: Rlimit) -> ContainerConfig {
        ContainerConfig::builder(CommandInfo::shell("true"), "/sandbox")
            .container_info(ContainerInfo {
                rlimits: [(RlimitKind::Nofile, limit)].into(),
                ..ContainerInfo::default()
            })
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn consistent_limits_pass_through() {
        let info = RlimitsIsolator
            .prepare(&ContainerId::new("c"), &config(Rlimit::fixed(1024)))
            .await
            .expect("prepare")
            .expect("info");
        assert_eq!(info.rlimits[&RlimitKind::Nofile], Rlimit::fixed(1024));
    }

    #[tokio::test]
    async fn soft_above_hard_is_rejected() {
        let limit = Rlimit {
            soft: Some(10),
            hard: Some(5),
        };
        assert!(
            RlimitsIsolator
                .prepare(&ContainerId::new("c"), &config(limit))
                .await
                .is_err()
        );
    }
}

//! Linux namespace isolation.
//!
//! The [`NamespaceIsolator`] only decides which namespaces a container
//! creates and which it joins from its parent; the launcher performs the
//! actual `unshare(2)`/`setns(2)` calls through [`sys`]. The network
//! namespace of top-level containers belongs to the network isolator.

pub mod sys;

use async_trait::async_trait;
use dashmap::DashSet;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{CommandInfo, ContainerConfig, ContainerLaunchInfo, ContainerState};
use isolon_common::types::{ContainerId, Namespace};

use crate::isolator::{IsolationStage, Isolator};

const TOP_LEVEL: [Namespace; 4] = [Namespace::Mount, Namespace::Pid, Namespace::Ipc, Namespace::Uts];
const NESTED_CLONE: [Namespace; 2] = [Namespace::Mount, Namespace::Pid];
const NESTED_ENTER: [Namespace; 3] = [Namespace::Network, Namespace::Ipc, Namespace::Uts];
const DEBUG_ENTER: [Namespace; 5] = [
    Namespace::Mount,
    Namespace::Pid,
    Namespace::Network,
    Namespace::Ipc,
    Namespace::Uts,
];

/// Creates or joins namespaces depending on nesting and container class.
#[derive(Debug, Default)]
pub struct NamespaceIsolator {
    user_namespace: bool,
    mapped: DashSet<ContainerId>,
}

impl NamespaceIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "namespaces";

    /// Creates the isolator. With `user_namespace`, top-level containers get
    /// their own user namespace mapping root to the runtime's user.
    #[must_use]
    pub fn new(user_namespace: bool) -> Self {
        Self {
            user_namespace,
            mapped: DashSet::new(),
        }
    }

    fn plan(&self, id: &ContainerId, config: &ContainerConfig) -> ContainerLaunchInfo {
        let mut info = ContainerLaunchInfo::default();
        if !id.is_nested() {
            if self.user_namespace {
                info.clone_namespaces.push(Namespace::User);
            }
            info.clone_namespaces.extend(TOP_LEVEL);
            if let Some(hostname) = config.container_info.as_ref().and_then(|c| c.hostname.clone()) {
                info.pre_exec_commands
                    .push(CommandInfo::argv(["hostname", hostname.as_str()]));
            }
            return info;
        }

        if self.user_namespace {
            info.enter_namespaces.push(Namespace::User);
        }
        if config.is_debug() {
            info.enter_namespaces.extend(DEBUG_ENTER);
        } else {
            info.clone_namespaces.extend(NESTED_CLONE);
            info.enter_namespaces.extend(NESTED_ENTER);
        }
        info
    }
}

#[async_trait]
impl Isolator for NamespaceIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Namespace
    }

    fn supports_nesting(&self) -> bool {
        true
    }

    async fn recover(&self, state: &ContainerState) -> Result<()> {
        if state.pid == 0 || !sys::is_alive(state.pid) {
            return Err(IsolonError::RecoveryMismatch {
                isolator: Self::NAME.into(),
                id: state.container_id.to_string(),
                message: format!("init process {} is gone", state.pid),
            });
        }
        Ok(())
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let info = self.plan(id, config);
        tracing::debug!(
            id = %id,
            clone = ?info.clone_namespaces,
            enter = ?info.enter_namespaces,
            "namespaces planned"
        );
        if info.clone_namespaces.contains(&Namespace::User) {
            let _ = self.mapped.insert(id.clone());
        }
        Ok(Some(info))
    }

    async fn isolate(&self, id: &ContainerId, pid: u32) -> Result<()> {
        if self.mapped.contains(id) {
            let uid = nix::unistd::geteuid().as_raw();
            sys::write_id_maps(pid, 0, uid, 1)?;
        }
        Ok(())
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        let _ = self.mapped.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::protocol::ContainerInfo;
    use isolon_common::types::ContainerClass;

    fn config(class: ContainerClass) -> ContainerConfig {
        ContainerConfig::builder(CommandInfo::shell("true"), "/sandbox")
            .class(class)
            .container_info(ContainerInfo {
                hostname: Some("box".into()),
                ..ContainerInfo::default()
            })
            .build()
            .expect("config")
    }

    #[tokio::test]
    async fn top_level_clones_and_sets_hostname() {
        let isolator = NamespaceIsolator::new(false);
        let info = isolator
            .prepare(&ContainerId::new("top"), &config(ContainerClass::Default))
            .await
            .expect("prepare")
            .expect("info");
        assert_eq!(info.clone_namespaces, TOP_LEVEL.to_vec());
        assert!(info.enter_namespaces.is_empty());
        assert_eq!(
            info.pre_exec_commands[0].arguments,
            vec!["hostname".to_string(), "box".to_string()]
        );
    }

    #[tokio::test]
    async fn nested_child_joins_parent_network() {
        let isolator = NamespaceIsolator::new(false);
        let id = ContainerId::new("top").child("task");
        let info = isolator
            .prepare(&id, &config(ContainerClass::Default))
            .await
            .expect("prepare")
            .expect("info");
        assert_eq!(info.clone_namespaces, NESTED_CLONE.to_vec());
        assert!(info.enter_namespaces.contains(&Namespace::Network));
        assert!(info.pre_exec_commands.is_empty());
    }

    #[tokio::test]
    async fn debug_child_enters_everything() {
        let isolator = NamespaceIsolator::new(true);
        let id = ContainerId::new("top").child("debug");
        let info = isolator
            .prepare(&id, &config(ContainerClass::Debug))
            .await
            .expect("prepare")
            .expect("info");
        assert!(info.clone_namespaces.is_empty());
        assert_eq!(info.enter_namespaces[0], Namespace::User);
        assert_eq!(info.enter_namespaces.len(), DEBUG_ENTER.len() + 1);
    }

    #[tokio::test]
    async fn recover_rejects_dead_pid() {
        let isolator = NamespaceIsolator::new(false);
        let state = ContainerState {
            executor_info: None,
            container_id: ContainerId::new("gone"),
            pid: 0,
            directory: "/sandbox".into(),
        };
        assert!(matches!(
            isolator.recover(&state).await,
            Err(IsolonError::RecoveryMismatch { .. })
        ));

        let alive = ContainerState {
            pid: std::process::id(),
            ..state
        };
        isolator.recover(&alive).await.expect("own pid is alive");
    }
}

//! Linux capability management for least-privilege execution.
//!
//! The isolator only computes the retained set; the launcher restricts the
//! bounding set to it when exec'ing the container's command.

use std::collections::BTreeSet;

use async_trait::async_trait;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerConfig, ContainerLaunchInfo};
use isolon_common::types::{Capability, ContainerId};

use crate::isolator::{IsolationStage, Isolator};

/// Kernel name of a capability without the `cap_` prefix, as `setpriv`
/// expects it.
#[must_use]
pub const fn name(cap: Capability) -> &'static str {
    match cap {
        Capability::Chown => "chown",
        Capability::DacOverride => "dac_override",
        Capability::Fowner => "fowner",
        Capability::Fsetid => "fsetid",
        Capability::Kill => "kill",
        Capability::Setgid => "setgid",
        Capability::Setuid => "setuid",
        Capability::Setpcap => "setpcap",
        Capability::NetBindService => "net_bind_service",
        Capability::NetAdmin => "net_admin",
        Capability::NetRaw => "net_raw",
        Capability::SysChroot => "sys_chroot",
        Capability::SysPtrace => "sys_ptrace",
        Capability::SysAdmin => "sys_admin",
        Capability::Mknod => "mknod",
        Capability::AuditWrite => "audit_write",
        Capability::Setfcap => "setfcap",
    }
}

/// Bounding-set specification retaining exactly `retained`, e.g.
/// `-all,+chown,+kill`.
#[must_use]
pub fn bounding_set(retained: &BTreeSet<Capability>) -> String {
    std::iter::once("-all".to_string())
        .chain(retained.iter().map(|c| format!("+{}", name(*c))))
        .collect::<Vec<_>>()
        .join(",")
}

/// Restricts containers to an allowed capability set.
#[derive(Debug, Clone)]
pub struct CapabilitiesIsolator {
    allowed: BTreeSet<Capability>,
}

impl CapabilitiesIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "capabilities";

    /// Creates the isolator with the set containers may retain.
    #[must_use]
    pub const fn new(allowed: BTreeSet<Capability>) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl Isolator for CapabilitiesIsolator {
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
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let requested = config
            .container_info
            .as_ref()
            .and_then(|c| c.capabilities.clone());
        let retained = match requested {
            Some(requested) if !config.is_debug() => {
                if let Some(denied) = requested.difference(&self.allowed).next() {
                    return Err(IsolonError::isolator(
                        Self::NAME,
                        "prepare",
                        format!("capability {denied:?} is not allowed"),
                    ));
                }
                requested
            }
            _ => self.allowed.clone(),
        };
        tracing::debug!(id = %id, retained = retained.len(), "capabilities computed");
        Ok(Some(ContainerLaunchInfo {
            capabilities: retained,
            ..ContainerLaunchInfo::default()
        }))
    }

    async fn cleanup(&self, _id: &ContainerId) -> Result<()> {
        Ok(())
    }
}

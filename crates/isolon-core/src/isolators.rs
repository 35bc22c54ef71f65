//! Builds the isolator set named in the runtime configuration.

use std::sync::Arc;

use isolon_common::config::IsolonConfig;
use isolon_common::error::{IsolonError, Result};

use crate::capability::CapabilitiesIsolator;
use crate::cgroup::isolator::{CgroupCpuIsolator, CgroupMemoryIsolator};
use crate::filesystem::FilesystemIsolator;
use crate::isolator::{Isolator, sort_by_stage};
use crate::namespace::NamespaceIsolator;
use crate::network::NetworkIsolator;
use crate::rlimits::RlimitsIsolator;

/// Instantiates every enabled isolator, in pipeline order.
///
/// # Errors
///
/// Returns [`IsolonError::InvalidConfig`] for an unknown isolator name.
pub fn build(config: &IsolonConfig) -> Result<Vec<Arc<dyn Isolator>>> {
    let mut isolators = config
        .isolators
        .iter()
        .map(|name| -> Result<Arc<dyn Isolator>> {
            Ok(match name.as_str() {
                NamespaceIsolator::NAME => Arc::new(NamespaceIsolator::new(config.user_namespace)),
                FilesystemIsolator::NAME => Arc::new(FilesystemIsolator::new(&config.runtime_dir)),
                NetworkIsolator::NAME => Arc::new(NetworkIsolator::new(config.network_mode)),
                CgroupCpuIsolator::NAME => Arc::new(CgroupCpuIsolator::new(&config.cgroup_root)),
                CgroupMemoryIsolator::NAME => Arc::new(CgroupMemoryIsolator::new(
                    &config.cgroup_root,
                    config.monitor_interval(),
                )),
                CapabilitiesIsolator::NAME => {
                    Arc::new(CapabilitiesIsolator::new(config.allowed_capabilities.clone()))
                }
                RlimitsIsolator::NAME => Arc::new(RlimitsIsolator),
                other => {
                    return Err(IsolonError::invalid_config(format!(
                        "unknown isolator '{other}'"
                    )));
                }
            })
        })
        .collect::<Result<Vec<_>>>()?;
    sort_by_stage(&mut isolators);
    tracing::info!(
        isolators = ?isolators.iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
        "isolators built"
    );
    Ok(isolators)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::config::KNOWN_ISOLATORS;

    #[test]
    fn every_known_name_builds_in_stage_order() {
        let config = IsolonConfig::default();
        let isolators = build(&config).expect("build");
        assert_eq!(isolators.len(), KNOWN_ISOLATORS.len());
        assert_eq!(isolators[0].name(), NamespaceIsolator::NAME);
        assert_eq!(isolators[1].name(), FilesystemIsolator::NAME);
        assert_eq!(isolators[2].name(), NetworkIsolator::NAME);
        let stages: Vec<_> = isolators.iter().map(|i| i.stage()).collect();
        assert!(stages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let config = IsolonConfig {
            isolators: vec!["gpu".into()],
            ..IsolonConfig::default()
        };
        assert!(matches!(build(&config), Err(IsolonError::InvalidConfig { .. })));
    }
}

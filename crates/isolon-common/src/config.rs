//! Global configuration model for the isolon runtime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{IsolonError, Result};
use crate::protocol::NetworkMode;
use crate::types::Capability;

/// Names of the isolators the runtime knows how to build.
pub const KNOWN_ISOLATORS: &[&str] = &[
    "namespaces",
    "filesystem",
    "network",
    "cgroups/cpu",
    "cgroups/mem",
    "capabilities",
    "rlimits",
];

/// Root configuration for the isolon runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolonConfig {
    /// Base directory for runtime state and scratch root filesystems.
    pub runtime_dir: PathBuf,
    /// Path to the checkpoint index.
    pub checkpoint_file: PathBuf,
    /// Cgroup v2 mount point.
    pub cgroup_root: PathBuf,
    /// Upper bound on each isolator call.
    pub isolator_timeout_secs: u64,
    /// Limitation polling and coalescing interval.
    pub monitor_interval_ms: u64,
    /// Enabled isolators, by name.
    pub isolators: Vec<String>,
    /// Capabilities containers may retain.
    pub allowed_capabilities: BTreeSet<Capability>,
    /// Network mode for containers that do not request one.
    pub network_mode: NetworkMode,
    /// Create a user namespace for top-level containers.
    pub user_namespace: bool,
}

impl Default for IsolonConfig {
    fn default() -> Self {
        Self {
            runtime_dir: constants::runtime_dir().clone(),
            checkpoint_file: constants::default_checkpoint_file(),
            cgroup_root: PathBuf::from(constants::CGROUP_V2_PATH),
            isolator_timeout_secs: constants::DEFAULT_ISOLATOR_TIMEOUT_SECS,
            monitor_interval_ms: constants::DEFAULT_MONITOR_INTERVAL_MS,
            isolators: KNOWN_ISOLATORS.iter().map(ToString::to_string).collect(),
            allowed_capabilities: default_capabilities(),
            network_mode: NetworkMode::Host,
            user_namespace: false,
        }
    }
}

/// The conventional unprivileged-container capability set.
#[must_use]
pub fn default_capabilities() -> BTreeSet<Capability> {
    [
        Capability::Chown,
        Capability::DacOverride,
        Capability::Fowner,
        Capability::Fsetid,
        Capability::Kill,
        Capability::Setgid,
        Capability::Setuid,
        Capability::Setpcap,
        Capability::NetBindService,
        Capability::NetRaw,
        Capability::SysChroot,
        Capability::Mknod,
        Capability::AuditWrite,
        Capability::Setfcap,
    ]
    .into()
}

impl IsolonConfig {
    /// Loads configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if it
    /// fails [`IsolonConfig::validate`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| IsolonError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Checks isolator names and time bounds.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::InvalidConfig`] for unknown or duplicated
    /// isolator names and for zero timeouts or intervals.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for name in &self.isolators {
            if !KNOWN_ISOLATORS.contains(&name.as_str()) {
                return Err(IsolonError::invalid_config(format!("unknown isolator '{name}'")));
            }
            if !seen.insert(name.as_str()) {
                return Err(IsolonError::invalid_config(format!(
                    "isolator '{name}' listed twice"
                )));
            }
        }
        if self.isolator_timeout_secs == 0 {
            return Err(IsolonError::invalid_config("isolator timeout must be positive"));
        }
        if self.monitor_interval_ms == 0 {
            return Err(IsolonError::invalid_config("monitor interval must be positive"));
        }
        Ok(())
    }

    /// Upper bound on each isolator call.
    #[must_use]
    pub const fn isolator_timeout(&self) -> Duration {
        Duration::from_secs(self.isolator_timeout_secs)
    }

    /// Limitation polling and coalescing interval.
    #[must_use]
    pub const fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_enables_every_known_isolator() {
        let config = IsolonConfig::default();
        assert_eq!(config.isolators.len(), KNOWN_ISOLATORS.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("isolon.json");
        std::fs::write(&path, r#"{"isolators": ["namespaces"], "monitor_interval_ms": 50}"#)
            .expect("write");
        let config = IsolonConfig::load(&path).expect("load");
        assert_eq!(config.isolators, vec!["namespaces"]);
        assert_eq!(config.monitor_interval(), Duration::from_millis(50));
        assert_eq!(
            config.isolator_timeout_secs,
            constants::DEFAULT_ISOLATOR_TIMEOUT_SECS
        );
    }

    #[test]
    fn unknown_isolator_is_rejected() {
        let config = IsolonConfig {
            isolators: vec!["gpu/nvidia".into()],
            ..IsolonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(IsolonError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn duplicate_isolator_is_rejected() {
        let config = IsolonConfig {
            isolators: vec!["rlimits".into(), "rlimits".into()],
            ..IsolonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = IsolonConfig::load(Path::new("/nonexistent/isolon.json")).unwrap_err();
        assert!(matches!(err, IsolonError::Io { .. }));
    }
}

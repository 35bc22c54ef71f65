//! `isolon validate` — Check a container configuration.

use std::path::{Path, PathBuf};

use clap::Args;
use isolon_common::protocol::ContainerConfig;

/// Arguments for the `validate` command.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the container configuration (JSON).
    pub file: PathBuf,
}

/// Executes the `validate` command.
///
/// # Errors
///
/// Returns an error if the file is missing, malformed, or invalid.
pub fn execute(args: &ValidateArgs) -> anyhow::Result<()> {
    let config = read_config(&args.file)?;
    let id = config
        .container_id
        .as_ref()
        .map_or_else(|| "<generated>".to_string(), ToString::to_string);
    println!("{}: valid (container {id}, class {:?})", args.file.display(), config.container_class);
    Ok(())
}

/// Reads and validates a container configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn read_config(path: &Path) -> anyhow::Result<ContainerConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("container configuration not found: {}: {e}", path.display())
    })?;
    let config: ContainerConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::protocol::CommandInfo;
    use isolon_common::types::ContainerId;

    #[test]
    fn reads_a_built_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("web.json");
        let config = ContainerConfig::builder(CommandInfo::shell("sleep 5"), dir.path())
            .id(ContainerId::new("web"))
            .build()
            .expect("config");
        std::fs::write(&path, serde_json::to_string(&config).expect("json")).expect("write");

        let read = read_config(&path).expect("read");
        assert_eq!(read, config);
    }

    #[test]
    fn rejects_missing_file() {
        assert!(read_config(Path::new("/nonexistent/web.json")).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert!(read_config(&path).is_err());
    }
}

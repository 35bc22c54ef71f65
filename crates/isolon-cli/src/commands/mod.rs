//! CLI command definitions and dispatch.

pub mod ps;
pub mod recover;
pub mod run;
pub mod stop;
pub mod validate;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use isolon_common::config::IsolonConfig;
use isolon_common::error::Result;
use isolon_common::types::ContainerId;
use isolon_runtime::{Containerizer, ProcessLauncher, RecoveryReport};

/// isolon — isolate, launch, and recover containers.
#[derive(Parser, Debug)]
#[command(name = "isolon", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Runtime settings (JSON). Defaults apply when omitted.
    #[arg(long, global = true, env = "ISOLON_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check a container configuration without launching it.
    Validate(validate::ValidateArgs),
    /// Launch a container and supervise it until it terminates.
    Run(run::RunArgs),
    /// Reconcile containers left behind by a previous run.
    Recover(recover::RecoverArgs),
    /// List checkpointed containers.
    Ps(ps::PsArgs),
    /// Destroy a container.
    Stop(stop::StopArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let settings = load_settings(cli.settings.as_deref())?;
    match cli.command {
        Command::Validate(args) => validate::execute(&args),
        Command::Run(args) => run::execute(args, &settings).await,
        Command::Recover(args) => recover::execute(&args, &settings).await,
        Command::Ps(args) => ps::execute(&args, &settings),
        Command::Stop(args) => stop::execute(&args, &settings).await,
    }
}

/// Reads the runtime settings, falling back to defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be loaded or fails validation.
pub fn load_settings(path: Option<&Path>) -> Result<IsolonConfig> {
    path.map_or_else(|| Ok(IsolonConfig::default()), IsolonConfig::load)
}

/// Builds a containerizer backed by real processes.
///
/// # Errors
///
/// Returns an error if an isolator cannot be constructed.
pub fn containerizer(settings: &IsolonConfig) -> Result<Containerizer> {
    Containerizer::from_config(settings, Arc::new(ProcessLauncher::new()))
}

/// Runs recovery from the checkpoint and the container cgroups on disk.
///
/// Every cgroup found is reported as known, so containers that are running
/// but were never checkpointed get destroyed.
///
/// # Errors
///
/// Returns an error if the checkpoint or cgroup tree cannot be read.
pub async fn recover(containerizer: &Containerizer, settings: &IsolonConfig) -> Result<RecoveryReport> {
    let known: Vec<ContainerId> = isolon_core::cgroup::discover(&settings.cgroup_root)?
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let info = match containerizer.checkpoints() {
        Some(store) => store.recover_info(known, [])?,
        None => isolon_common::protocol::ContainerRecoverInfo {
            known_container_ids: known.into_iter().collect(),
            ..Default::default()
        },
    };
    tracing::debug!(
        checkpointed = info.checkpointed.len(),
        known = info.known_container_ids.len(),
        "starting recovery"
    );
    containerizer.recover(info).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_when_absent() {
        let settings = load_settings(None).expect("defaults");
        assert_eq!(settings, IsolonConfig::default());
    }

    #[test]
    fn settings_are_validated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"isolator_timeout_secs": 0}"#).expect("write");
        assert!(load_settings(Some(&path)).is_err());
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "isolon",
            "stop",
            "web",
            "--log-format",
            "json",
            "--settings",
            "/etc/isolon.json",
        ])
        .expect("parse");
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.settings.as_deref(), Some(Path::new("/etc/isolon.json")));
        assert!(matches!(cli.command, Command::Stop(_)));
    }
}

//! `isolon run` — Launch a container and supervise it.

use std::path::PathBuf;

use clap::Args;
use isolon_common::config::IsolonConfig;
use isolon_common::types::ContainerId;
use isolon_runtime::Containerizer;
use tokio::sync::broadcast::error::RecvError;

use super::validate::read_config;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the container configuration (JSON).
    pub file: PathBuf,

    /// Return once the container is running instead of supervising it.
    #[arg(short, long)]
    pub detach: bool,
}

/// Executes the `run` command.
///
/// Recovery runs first so that containers from a previous run are either
/// adopted or destroyed before the new one launches. Without `--detach`
/// the command waits for the container to terminate, destroying it on
/// Ctrl+C, and prints the termination as JSON.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the launch fails.
pub async fn execute(args: RunArgs, settings: &IsolonConfig) -> anyhow::Result<()> {
    let config = read_config(&args.file)?;
    let containerizer = super::containerizer(settings)?;
    let report = super::recover(&containerizer, settings).await?;
    if !report.outcomes.is_empty() {
        tracing::info!(
            recovered = report.recovered().count(),
            destroyed = report.destroyed().count(),
            "previous containers reconciled"
        );
    }

    let log = log_transitions(&containerizer);
    let id = containerizer.launch(config).await?;
    containerizer.watch(&id)?;
    let pid = containerizer.pid(&id)?;
    tracing::info!(id = %id, pid = ?pid, "container running");

    if args.detach {
        println!("{id}");
        return Ok(());
    }

    let termination = supervise(&containerizer, &id).await?;
    log.abort();
    tracing::info!(id = %id, "{}", output::describe_termination(&termination));
    output::print_json(&termination)
}

async fn supervise(
    containerizer: &Containerizer,
    id: &ContainerId,
) -> anyhow::Result<isolon_common::protocol::ContainerTermination> {
    tokio::select! {
        termination = containerizer.wait(id) => Ok(termination?),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!(id = %id, "interrupted, destroying container");
            Ok(containerizer.destroy(id).await?)
        }
    }
}

fn log_transitions(containerizer: &Containerizer) -> tokio::task::JoinHandle<()> {
    let mut events = containerizer.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::debug!(
                    id = %event.id,
                    from = ?event.from,
                    to = %event.to,
                    "lifecycle transition"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "lifecycle events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

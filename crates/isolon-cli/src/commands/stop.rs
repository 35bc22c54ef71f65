//! `isolon stop` — Destroy a container.

use clap::Args;
use isolon_common::config::IsolonConfig;
use isolon_common::types::ContainerId;

use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container id; nested ids use `parent.child`.
    pub id: String,
}

/// Executes the `stop` command.
///
/// Recovers first so the container is back under supervision, then
/// destroys it and prints its termination. Nested containers go first.
///
/// # Errors
///
/// Returns an error if the id is malformed or the container is unknown.
pub async fn execute(args: &StopArgs, settings: &IsolonConfig) -> anyhow::Result<()> {
    let id: ContainerId = args.id.parse()?;
    let containerizer = super::containerizer(settings)?;
    let _ = super::recover(&containerizer, settings).await?;

    let termination = containerizer.destroy(&id).await?;
    tracing::info!(id = %id, "{}", output::describe_termination(&termination));
    output::print_json(&termination)
}

//! `isolon recover` — Reconcile containers left behind by a previous run.

use std::collections::BTreeMap;

use clap::Args;
use isolon_common::config::IsolonConfig;
use isolon_runtime::{RecoveryOutcome, RecoveryReport};

use crate::output;

/// Arguments for the `recover` command.
#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Print only the ids that were destroyed.
    #[arg(long)]
    pub destroyed_only: bool,
}

/// Executes the `recover` command.
///
/// Recovered containers keep running after the command exits and are
/// picked up again by the next `run`, `recover`, or `stop`.
///
/// # Errors
///
/// Returns an error if recovery cannot read its inputs.
pub async fn execute(args: &RecoverArgs, settings: &IsolonConfig) -> anyhow::Result<()> {
    let containerizer = super::containerizer(settings)?;
    let report = super::recover(&containerizer, settings).await?;
    tracing::info!(
        recovered = report.recovered().count(),
        destroyed = report.destroyed().count(),
        "recovery complete"
    );
    output::print_json(&summarize(&report, args.destroyed_only))
}

fn summarize(report: &RecoveryReport, destroyed_only: bool) -> BTreeMap<String, RecoveryOutcome> {
    report
        .outcomes
        .iter()
        .filter(|(_, outcome)| !destroyed_only || **outcome == RecoveryOutcome::Destroyed)
        .map(|(id, outcome)| (id.to_string(), *outcome))
        .collect()
}

//! `isolon ps` — List checkpointed containers.

use std::path::Path;

use clap::Args;
use isolon_common::config::IsolonConfig;
use isolon_runtime::CheckpointStore;
use isolon_runtime::checkpoint::CheckpointEntry;

use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Print the checkpoint entries as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// Reads the checkpoint index only; nothing is recovered or modified.
///
/// # Errors
///
/// Returns an error if the checkpoint cannot be read.
pub fn execute(args: &PsArgs, settings: &IsolonConfig) -> anyhow::Result<()> {
    let store = CheckpointStore::open(&settings.checkpoint_file);
    let entries = store.load()?;

    if args.json {
        return output::print_json(&entries);
    }
    if entries.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<32} {:<8} {:<6} {:<20} {}",
        "CONTAINER ID", "PID", "ALIVE", "CHECKPOINTED", "SANDBOX"
    );
    for entry in &entries {
        println!("{}", row(entry, Path::new("/proc")));
    }
    Ok(())
}

fn row(entry: &CheckpointEntry, proc_root: &Path) -> String {
    let state = &entry.state;
    let alive = if proc_root.join(state.pid.to_string()).exists() {
        "yes"
    } else {
        "no"
    };
    format!(
        "{:<32} {:<8} {:<6} {:<20} {}",
        output::truncate(&state.container_id.to_string(), 32),
        state.pid,
        alive,
        entry.checkpointed_at.format("%Y-%m-%d %H:%M:%S"),
        state.directory.display()
    )
}

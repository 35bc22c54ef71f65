//! Formatted output helpers for CLI commands.
//!
//! Machine-readable results go to stdout as pretty JSON; human summaries
//! of terminations are built here so every command words them the same.

use isolon_common::protocol::ContainerTermination;
use serde::Serialize;

/// Prints `value` as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line description of how a container ended.
#[must_use]
pub fn describe_termination(termination: &ContainerTermination) -> String {
    let status = termination
        .status
        .map_or_else(|| "no exit status".to_string(), |s| s.to_string());
    let mut line = match termination.state {
        Some(state) => format!("{state:?}: {status}"),
        None => status,
    };
    if !termination.message.is_empty() {
        line.push_str(" (");
        line.push_str(&termination.message);
        line.push(')');
    }
    line
}

/// Truncates `value` to `width` characters for table columns.
#[must_use]
pub fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

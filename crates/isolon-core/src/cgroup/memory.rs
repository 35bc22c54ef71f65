//! Memory resource control via cgroups v2.
//!
//! Manages `memory.max` and reads the `memory.events` counters that reveal
//! OOM kills.

use std::path::Path;

use isolon_common::error::Result;
use isolon_common::resources::{MEM, Resources};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Converts the summed `mem` shares (MB, across roles) to a byte limit.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn limit_bytes(resources: &Resources) -> Option<u64> {
    resources
        .scalar(MEM)
        .filter(|mb| *mb > 0.0)
        .map(|mb| (mb * BYTES_PER_MB as f64).round() as u64)
}

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    super::write_control(cgroup_path, "memory.max", &bytes.to_string())?;
    tracing::debug!(bytes, "memory max set");
    Ok(())
}

/// Reads the configured hard limit; `None` when unlimited.
///
/// # Errors
///
/// Returns an error if `memory.max` cannot be read.
pub fn memory_max(cgroup_path: &Path) -> Result<Option<u64>> {
    super::read_u64(cgroup_path, "memory.max")
}

/// Reads the cumulative number of OOM kills in the cgroup.
///
/// # Errors
///
/// Returns an error if `memory.events` cannot be read.
pub fn oom_kills(cgroup_path: &Path) -> Result<u64> {
    Ok(super::read_keyed(cgroup_path, "memory.events", "oom_kill")?.unwrap_or(0))
}

/// Reads current and peak memory usage.
///
/// # Errors
///
/// Returns an error if either control file cannot be read.
pub fn usage(cgroup_path: &Path) -> Result<(Option<u64>, Option<u64>)> {
    Ok((
        super::read_u64(cgroup_path, "memory.current")?,
        super::read_u64(cgroup_path, "memory.peak")?,
    ))
}

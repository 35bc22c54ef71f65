//! CPU resource control via cgroups v2.
//!
//! Manages `cpu.weight` and reads `cpu.stat`.

use std::path::Path;

use isolon_common::error::Result;
use isolon_common::resources::{CPUS, Resources};

/// Weight of a cgroup entitled to exactly one CPU.
pub const WEIGHT_PER_CPU: f64 = 100.0;
/// Smallest weight the kernel accepts.
pub const MIN_WEIGHT: u64 = 1;
/// Largest weight the kernel accepts.
pub const MAX_WEIGHT: u64 = 10_000;

/// Converts the summed `cpus` shares to a `cpu.weight` value.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn weight_for(resources: &Resources) -> Option<u64> {
    resources
        .scalar(CPUS)
        .filter(|cpus| *cpus > 0.0)
        .map(|cpus| ((cpus * WEIGHT_PER_CPU).round() as u64).clamp(MIN_WEIGHT, MAX_WEIGHT))
}

/// Sets the CPU weight for a cgroup.
///
/// Weight is a value between 1 and 10000 that controls the relative
/// share of CPU time this cgroup receives under contention.
///
/// # Errors
///
/// Returns an error if writing to `cpu.weight` fails.
pub fn set_cpu_weight(cgroup_path: &Path, weight: u64) -> Result<()> {
    super::write_control(cgroup_path, "cpu.weight", &weight.to_string())?;
    tracing::debug!(weight, "CPU weight set");
    Ok(())
}

/// Reads the configured CPU weight.
///
/// # Errors
///
/// Returns an error if `cpu.weight` cannot be read.
pub fn cpu_weight(cgroup_path: &Path) -> Result<Option<u64>> {
    super::read_u64(cgroup_path, "cpu.weight")
}

/// Reads cumulative CPU time in microseconds.
///
/// # Errors
///
/// Returns an error if `cpu.stat` cannot be read.
pub fn usage_usec(cgroup_path: &Path) -> Result<Option<u64>> {
    super::read_keyed(cgroup_path, "cpu.stat", "usage_usec")
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::resources::Resource;

    #[test]
    fn weight_scales_and_clamps() {
        let one = Resources::new().with(Resource::scalar(CPUS, 1.0));
        assert_eq!(weight_for(&one), Some(100));

        let tiny = Resources::new().with(Resource::scalar(CPUS, 0.001));
        assert_eq!(weight_for(&tiny), Some(MIN_WEIGHT));

        let huge = Resources::new().with(Resource::scalar(CPUS, 512.0));
        assert_eq!(weight_for(&huge), Some(MAX_WEIGHT));
    }

    #[test]
    fn weight_roundtrips_through_control_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        set_cpu_weight(dir.path(), 250).expect("write");
        assert_eq!(cpu_weight(dir.path()).expect("read"), Some(250));
    }
}

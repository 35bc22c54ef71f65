//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for isolon runtime data on Linux with root access.
pub const SYSTEM_RUNTIME_DIR: &str = "/var/lib/isolon";

/// Returns the runtime directory, preferring `$HOME/.isolon` for non-root
/// environments and falling back to `/var/lib/isolon`.
fn resolve_runtime_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let user_dir = PathBuf::from(home).join(".isolon");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_RUNTIME_DIR)
}

static RUNTIME_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved runtime directory for this session.
pub fn runtime_dir() -> &'static PathBuf {
    RUNTIME_DIR.get_or_init(resolve_runtime_dir)
}

/// Returns the default checkpoint file path.
pub fn default_checkpoint_file() -> PathBuf {
    runtime_dir().join(CHECKPOINT_FILE_NAME)
}

/// File name of the checkpoint index inside the runtime directory.
pub const CHECKPOINT_FILE_NAME: &str = "checkpoint.json";

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Sub-hierarchy under the cgroup root owned by isolon.
pub const CGROUP_PREFIX: &str = "isolon";

/// Upper bound on a single isolator call, in seconds.
pub const DEFAULT_ISOLATOR_TIMEOUT_SECS: u64 = 60;

/// Limitation polling and coalescing interval, in milliseconds.
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 500;

/// Mount point of the sandbox directory inside a container with its own rootfs.
pub const SANDBOX_MOUNT_POINT: &str = "/mnt/isolon/sandbox";

/// Environment variable exposing the sandbox path to the container.
pub const SANDBOX_ENV: &str = "ISOLON_SANDBOX";

/// Capacity of broadcast channels for lifecycle events and terminations.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Application name used in logs and state files.
pub const APP_NAME: &str = "isolon";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "isolon";

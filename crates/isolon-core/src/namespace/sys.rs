//! Namespace syscalls used by the launcher and the namespace isolator.
//!
//! The launcher calls [`enter`] and [`unshare`] from a forked child, so
//! both only issue syscalls and never allocate.

use std::fs::File;
use std::path::PathBuf;

use isolon_common::error::{IsolonError, Result};
use isolon_common::types::Namespace;

/// Path of a process's namespace handle, e.g. `/proc/42/ns/net`.
#[must_use]
pub fn ns_path(pid: u32, namespace: Namespace) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/{}", namespace.proc_name()))
}

/// Opens the namespace handles of `pid` for later [`enter`] calls.
///
/// # Errors
///
/// Returns an error if any `/proc/<pid>/ns/*` entry cannot be opened.
pub fn open(pid: u32, namespaces: &[Namespace]) -> Result<Vec<(Namespace, File)>> {
    namespaces
        .iter()
        .map(|ns| {
            let path = ns_path(pid, *ns);
            File::open(&path)
                .map(|file| (*ns, file))
                .map_err(|e| IsolonError::Io { path, source: e })
        })
        .collect()
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::File;

    use isolon_common::error::{IsolonError, Result};
    use isolon_common::types::Namespace;
    use nix::sched::CloneFlags;

    pub const fn flag(namespace: Namespace) -> CloneFlags {
        match namespace {
            Namespace::Mount => CloneFlags::CLONE_NEWNS,
            Namespace::Pid => CloneFlags::CLONE_NEWPID,
            Namespace::Network => CloneFlags::CLONE_NEWNET,
            Namespace::Ipc => CloneFlags::CLONE_NEWIPC,
            Namespace::Uts => CloneFlags::CLONE_NEWUTS,
            Namespace::User => CloneFlags::CLONE_NEWUSER,
            Namespace::Cgroup => CloneFlags::CLONE_NEWCGROUP,
        }
    }

    /// Combines namespace kinds into `clone(2)` flags.
    pub fn clone_flags(namespaces: &[Namespace]) -> CloneFlags {
        namespaces
            .iter()
            .fold(CloneFlags::empty(), |acc, ns| acc | flag(*ns))
    }

    pub fn unshare(namespaces: &[Namespace]) -> std::io::Result<()> {
        if namespaces.is_empty() {
            return Ok(());
        }
        nix::sched::unshare(clone_flags(namespaces)).map_err(std::io::Error::from)
    }

    pub fn enter(handles: &[(Namespace, File)]) -> std::io::Result<()> {
        for (namespace, file) in handles {
            nix::sched::setns(file, flag(*namespace)).map_err(std::io::Error::from)?;
        }
        Ok(())
    }

    pub fn is_alive(pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), None) {
            Ok(()) | Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub fn write_id_maps(pid: u32, inside: u32, outside: u32, range: u32) -> Result<()> {
        let map = format!("{inside} {outside} {range}");

        let setgroups = format!("/proc/{pid}/setgroups");
        if std::path::Path::new(&setgroups).exists() {
            std::fs::write(&setgroups, "deny").map_err(|e| IsolonError::Io {
                path: setgroups.into(),
                source: e,
            })?;
        }
        for file in ["uid_map", "gid_map"] {
            let path = format!("/proc/{pid}/{file}");
            std::fs::write(&path, &map).map_err(|e| IsolonError::Io {
                path: path.into(),
                source: e,
            })?;
        }
        tracing::debug!(pid, inside, outside, range, "wrote uid/gid maps");
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub use linux::clone_flags;

/// Creates new namespaces for the calling process.
///
/// # Errors
///
/// Returns the raw OS error from `unshare(2)`.
#[cfg(target_os = "linux")]
pub fn unshare(namespaces: &[Namespace]) -> std::io::Result<()> {
    linux::unshare(namespaces)
}

/// Joins previously opened namespaces, in the given order.
///
/// # Errors
///
/// Returns the raw OS error from `setns(2)`.
#[cfg(target_os = "linux")]
pub fn enter(handles: &[(Namespace, File)]) -> std::io::Result<()> {
    linux::enter(handles)
}

/// Returns whether a process with this pid exists.
#[cfg(target_os = "linux")]
#[must_use]
pub fn is_alive(pid: u32) -> bool {
    linux::is_alive(pid)
}

/// Maps `range` ids starting at `inside` in the user namespace of `pid` to
/// `outside` on the host. `setgroups` is denied first, as unprivileged
/// mappings require.
///
/// # Errors
///
/// Returns an error if writing to `/proc/<pid>/{setgroups,uid_map,gid_map}` fails.
#[cfg(target_os = "linux")]
pub fn write_id_maps(pid: u32, inside: u32, outside: u32, range: u32) -> Result<()> {
    linux::write_id_maps(pid, inside, outside, range)
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> IsolonError {
    IsolonError::Launcher {
        message: "Linux required for namespace operations".into(),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error.
#[cfg(not(target_os = "linux"))]
pub fn unshare(_namespaces: &[Namespace]) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error.
#[cfg(not(target_os = "linux"))]
pub fn enter(_handles: &[(Namespace, File)]) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Stub for non-Linux platforms; reports every process as gone.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub const fn is_alive(_pid: u32) -> bool {
    false
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error.
#[cfg(not(target_os = "linux"))]
pub fn write_id_maps(_pid: u32, _inside: u32, _outside: u32, _range: u32) -> Result<()> {
    Err(unsupported())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_cover_every_requested_kind() {
        use nix::sched::CloneFlags;
        let flags = clone_flags(&[Namespace::Mount, Namespace::Pid]);
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(clone_flags(&[]).is_empty());
    }

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn own_namespaces_can_be_opened() {
        let handles = open(std::process::id(), &[Namespace::Uts]).expect("open");
        assert_eq!(handles.len(), 1);
        assert_eq!(ns_path(1, Namespace::Network), PathBuf::from("/proc/1/ns/net"));
    }
}

//! Mount planning for container filesystems.
//!
//! Mounts are not performed here: they become pre-exec commands that the
//! launcher runs inside the container's mount namespace.

use std::path::{Path, PathBuf};

use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{CommandInfo, Mount};

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Resolves a container path against an optional root filesystem.
#[must_use]
pub fn resolve_target(rootfs: Option<&Path>, target: &Path) -> PathBuf {
    match rootfs {
        Some(root) => root.join(target.strip_prefix("/").unwrap_or(target)),
        None => target.to_path_buf(),
    }
}

/// Commands mounting the essential pseudo-filesystems inside `rootfs`.
#[must_use]
pub fn essential_filesystems(rootfs: &Path) -> Vec<CommandInfo> {
    vec![CommandInfo::argv([
        "mount".to_string(),
        "-n".to_string(),
        "-t".to_string(),
        "proc".to_string(),
        "proc".to_string(),
        path_arg(&rootfs.join("proc")),
    ])]
}

/// Commands bind-mounting `source` onto `target`, remounting read-only if
/// requested.
#[must_use]
pub fn bind_mount(source: &Path, target: &Path, read_only: bool) -> Vec<CommandInfo> {
    let mut commands = vec![CommandInfo::argv([
        "mount".to_string(),
        "-n".to_string(),
        "--rbind".to_string(),
        path_arg(source),
        path_arg(target),
    ])];
    if read_only {
        commands.push(CommandInfo::argv([
            "mount".to_string(),
            "-n".to_string(),
            "-o".to_string(),
            "remount,bind,ro".to_string(),
            path_arg(target),
        ]));
    }
    commands
}

/// Plans a requested volume mount.
///
/// # Errors
///
/// Returns an error if the host source does not exist, or if the target
/// inside a root filesystem cannot be created.
pub fn plan_volume(isolator: &str, mount: &Mount, rootfs: Option<&Path>) -> Result<Vec<CommandInfo>> {
    if !mount.source.exists() {
        return Err(IsolonError::isolator(
            isolator,
            "prepare",
            format!("mount source {} does not exist", mount.source.display()),
        ));
    }
    let target = resolve_target(rootfs, &mount.target);
    if rootfs.is_some() {
        std::fs::create_dir_all(&target).map_err(|e| IsolonError::Io {
            path: target.clone(),
            source: e,
        })?;
    }
    tracing::debug!(
        source = %mount.source.display(),
        target = %target.display(),
        read_only = mount.read_only,
        "planned bind mount"
    );
    Ok(bind_mount(&mount.source, &target, mount.read_only))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_rebased_under_rootfs() {
        assert_eq!(
            resolve_target(Some(Path::new("/r")), Path::new("/data/x")),
            PathBuf::from("/r/data/x")
        );
        assert_eq!(resolve_target(None, Path::new("/data")), PathBuf::from("/data"));
    }

    #[test]
    fn read_only_adds_remount() {
        let commands = bind_mount(Path::new("/a"), Path::new("/b"), true);
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].arguments[3], "remount,bind,ro");
    }

    #[test]
    fn missing_source_fails() {
        let mount = Mount {
            source: "/definitely/not/here".into(),
            target: "/data".into(),
            read_only: false,
        };
        assert!(matches!(
            plan_volume("filesystem", &mount, None),
            Err(IsolonError::Isolator { .. })
        ));
    }
}

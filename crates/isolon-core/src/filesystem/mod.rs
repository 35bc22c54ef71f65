//! Filesystem isolation: sandbox exposure, scratch root filesystems, and
//! bind mounts.

pub mod mount;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use isolon_common::constants::{SANDBOX_ENV, SANDBOX_MOUNT_POINT};
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{ContainerConfig, ContainerLaunchInfo, ContainerState};
use isolon_common::types::ContainerId;

use crate::isolator::{IsolationStage, Isolator};

/// Provisions a scratch root filesystem for image-backed containers and
/// plans the requested bind mounts.
#[derive(Debug)]
pub struct FilesystemIsolator {
    rootfs_base: PathBuf,
    provisioned: DashMap<ContainerId, PathBuf>,
}

impl FilesystemIsolator {
    /// Isolator name used in configuration.
    pub const NAME: &'static str = "filesystem";

    /// Creates the isolator; scratch root filesystems live under
    /// `<runtime_dir>/rootfs`.
    #[must_use]
    pub fn new(runtime_dir: &Path) -> Self {
        Self {
            rootfs_base: runtime_dir.join("rootfs"),
            provisioned: DashMap::new(),
        }
    }

    /// Scratch root filesystem location for `id`.
    #[must_use]
    pub fn rootfs_for(&self, id: &ContainerId) -> PathBuf {
        let mut path = self.rootfs_base.clone();
        for segment in id.segments() {
            path.push(segment);
        }
        path
    }

    fn provision(&self, id: &ContainerId) -> Result<PathBuf> {
        let rootfs = self.rootfs_for(id);
        let sandbox = mount::resolve_target(Some(&rootfs), Path::new(SANDBOX_MOUNT_POINT));
        for dir in [rootfs.join("proc"), sandbox] {
            std::fs::create_dir_all(&dir).map_err(|e| IsolonError::Io { path: dir, source: e })?;
        }
        let _ = self.provisioned.insert(id.clone(), rootfs.clone());
        tracing::info!(id = %id, rootfs = %rootfs.display(), "scratch rootfs provisioned");
        Ok(rootfs)
    }
}

#[async_trait]
impl Isolator for FilesystemIsolator {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> IsolationStage {
        IsolationStage::Filesystem
    }

    fn supports_nesting(&self) -> bool {
        true
    }

    async fn recover(&self, state: &ContainerState) -> Result<()> {
        let rootfs = self.rootfs_for(&state.container_id);
        if rootfs.is_dir() {
            let _ = self.provisioned.insert(state.container_id.clone(), rootfs);
        }
        Ok(())
    }

    async fn prepare(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
    ) -> Result<Option<ContainerLaunchInfo>> {
        let mut info = ContainerLaunchInfo::default();
        let sandbox = config.sandbox();

        let rootfs = if config.image.is_some() {
            let rootfs = self.provision(id)?;
            let target = mount::resolve_target(Some(&rootfs), Path::new(SANDBOX_MOUNT_POINT));
            info.pre_exec_commands
                .extend(mount::essential_filesystems(&rootfs));
            info.pre_exec_commands
                .extend(mount::bind_mount(sandbox, &target, false));
            info.rootfs = Some(rootfs.clone());
            info.working_directory = Some(PathBuf::from(SANDBOX_MOUNT_POINT));
            let _ = info
                .environment
                .insert(SANDBOX_ENV.into(), SANDBOX_MOUNT_POINT.into());
            Some(rootfs)
        } else {
            let _ = info
                .environment
                .insert(SANDBOX_ENV.into(), sandbox.to_string_lossy().into_owned());
            None
        };

        for volume in config.container_info_or_default().mounts {
            info.pre_exec_commands
                .extend(mount::plan_volume(Self::NAME, &volume, rootfs.as_deref())?);
        }
        Ok(Some(info))
    }

    async fn cleanup(&self, id: &ContainerId) -> Result<()> {
        let _ = self.provisioned.remove(id);
        let rootfs = self.rootfs_for(id);
        match std::fs::remove_dir_all(&rootfs) {
            Ok(()) => {
                tracing::info!(id = %id, rootfs = %rootfs.display(), "scratch rootfs removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IsolonError::Io {
                path: rootfs,
                source: e,
            }),
        }
    }
}

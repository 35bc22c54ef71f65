//! The launcher boundary.
//!
//! The containerizer never forks or execs itself: it hands the merged
//! launch descriptor to a [`Launcher`], releases the process once every
//! isolator has placed it, and later asks the launcher to reap.

use async_trait::async_trait;
use isolon_common::error::Result;
use isolon_common::protocol::{ContainerConfig, ContainerLaunchInfo, ExitStatus};
use isolon_common::types::ContainerId;

/// Creates and reaps container processes.
///
/// Implementors handle the platform-specific details of entering
/// namespaces, applying limits, and exec'ing the command.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts the container's init process and returns its pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    async fn launch(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
        launch_info: &ContainerLaunchInfo,
    ) -> Result<u32>;

    /// Resolves when the init process exits on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be observed.
    async fn wait(&self, id: &ContainerId, pid: u32) -> Result<ExitStatus>;

    /// Kills the init process if it is still alive and returns how it ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or reaped.
    async fn reap(&self, id: &ContainerId, pid: u32) -> Result<ExitStatus>;

    /// Lets a launched process run past its isolation gate.
    ///
    /// Called once every isolator's `isolate` has placed the process.
    /// Launchers whose processes start unparked keep the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be released.
    fn release(&self, _id: &ContainerId) -> Result<()> {
        Ok(())
    }

    /// Pid of a container this launcher knows about, if any.
    fn pid(&self, _id: &ContainerId) -> Option<u32> {
        None
    }
}

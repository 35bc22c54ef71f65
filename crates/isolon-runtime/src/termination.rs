//! Building the single terminal record of a container.

use isolon_common::protocol::{ContainerLimitation, ContainerTermination, ExitStatus};
use isolon_common::types::{TaskState, TaskStatusReason};

/// Why the destroy path was entered. Set once, by whoever entered
/// `DESTROYING` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    /// External `destroy` request, or the parent being destroyed.
    Request,
    /// A limitation was observed while running.
    Limitation,
    /// The prepare pipeline, launcher, or an `isolate` call failed.
    LaunchFailed(String),
    /// The container could not be re-supervised after a restart.
    RecoveryFailed(String),
    /// The init process exited on its own.
    Exited,
}

pub fn build(
    cause: &TerminationCause,
    limitation: Option<&ContainerLimitation>,
    status: Option<ExitStatus>,
) -> ContainerTermination {
    let (state, reasons, message) = match (cause, limitation) {
        (TerminationCause::Limitation, Some(limitation)) => {
            let mut reasons = Vec::with_capacity(2);
            if let Some(reason) = limitation.reason {
                reasons.push(reason);
            }
            if !reasons.contains(&TaskStatusReason::ContainerLimitation) {
                reasons.push(TaskStatusReason::ContainerLimitation);
            }
            (TaskState::Failed, reasons, limitation.message.clone())
        }
        (TerminationCause::Limitation | TerminationCause::Request, _) => (
            TaskState::Killed,
            vec![TaskStatusReason::ContainerDestroyed],
            "destroyed by request".to_string(),
        ),
        (TerminationCause::LaunchFailed(message), _) => (
            TaskState::Failed,
            vec![TaskStatusReason::ContainerLaunchFailed],
            message.clone(),
        ),
        (TerminationCause::RecoveryFailed(message), _) => (
            TaskState::Lost,
            vec![TaskStatusReason::ContainerRecoveryFailed],
            message.clone(),
        ),
        (TerminationCause::Exited, _) => match status {
            Some(status) if status.success() => (TaskState::Finished, Vec::new(), status.to_string()),
            Some(status) => (
                TaskState::Failed,
                vec![TaskStatusReason::ExecutorTerminated],
                status.to_string(),
            ),
            None => (
                TaskState::Failed,
                vec![TaskStatusReason::ExecutorTerminated],
                "exit status unavailable".to_string(),
            ),
        },
    };
    ContainerTermination {
        status,
        state: Some(state),
        reasons,
        message,
    }
}

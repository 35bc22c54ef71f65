//! Unified error types for the isolon workspace.
//!
//! Variants mirror the coordination protocol's failure taxonomy. Which of
//! them propagate and which are only logged is decided by the containerizer:
//! prepare failures reach the `launch` caller, cleanup failures never leave
//! the destroy path.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::LifecycleState;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum IsolonError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A container configuration is malformed or incomplete.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A launch named a container id that is already registered.
    #[error("container already registered: {id}")]
    DuplicateContainer {
        /// The duplicated container id.
        id: String,
    },

    /// An operation referenced a container that is not (or no longer) registered.
    #[error("unknown container: {id}")]
    UnknownContainer {
        /// The unknown container id.
        id: String,
    },

    /// Two isolators produced incompatible values for the same launch field.
    #[error("isolator '{isolator}' conflicts with '{previous}' on launch field '{field}'")]
    ConflictingIsolatorOutput {
        /// Name of the merged field.
        field: &'static str,
        /// Isolator whose output was rejected.
        isolator: String,
        /// Isolator that set the field first.
        previous: String,
    },

    /// An isolator call exceeded its time bound.
    #[error("isolator '{isolator}' timed out after {timeout:?} during {operation}")]
    IsolatorTimeout {
        /// Isolator name.
        isolator: String,
        /// Operation that timed out (`prepare`, `recover`, ...).
        operation: &'static str,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// An isolator reported an explicit failure.
    #[error("isolator '{isolator}' failed during {operation}: {message}")]
    Isolator {
        /// Isolator name.
        isolator: String,
        /// Operation that failed.
        operation: &'static str,
        /// Failure description.
        message: String,
    },

    /// An isolator could not reconstruct its context for a checkpointed container.
    #[error("isolator '{isolator}' cannot recover container {id}: {message}")]
    RecoveryMismatch {
        /// Isolator name.
        isolator: String,
        /// Container being recovered.
        id: String,
        /// Mismatch description.
        message: String,
    },

    /// An isolator failed to release its resources. Logged, never propagated.
    #[error("isolator '{isolator}' failed to clean up container {id}: {message}")]
    CleanupFailure {
        /// Isolator name.
        isolator: String,
        /// Container being cleaned up.
        id: String,
        /// Failure description.
        message: String,
    },

    /// The launcher collaborator failed to start or reap a process.
    #[error("launcher error: {message}")]
    Launcher {
        /// Failure description.
        message: String,
    },

    /// A lifecycle transition was attempted that the state machine forbids.
    #[error("container {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        /// Container id.
        id: String,
        /// Current state.
        from: LifecycleState,
        /// Requested state.
        to: LifecycleState,
    },

    /// An operation that needs a running container found it in another state.
    #[error("container {id} is {state}, not RUNNING")]
    NotRunning {
        /// Container id.
        id: String,
        /// Current state.
        state: LifecycleState,
    },

    /// A launch was cancelled by a concurrent destroy.
    #[error("launch of container {id} was cancelled by destroy")]
    LaunchCancelled {
        /// Container id.
        id: String,
    },

    /// Recovery was requested after it had already completed.
    #[error("recovery has already completed")]
    RecoveryAlreadyCompleted,

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl IsolonError {
    /// Shorthand for an [`IsolonError::InvalidConfig`].
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for an explicit isolator failure.
    pub fn isolator(
        isolator: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Isolator {
            isolator: isolator.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, IsolonError>;

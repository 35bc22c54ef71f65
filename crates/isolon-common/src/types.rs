//! Domain primitive types used across the isolon workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{IsolonError, Result};

/// Separator used when rendering a nested container id as a single string.
pub const CONTAINER_ID_SEPARATOR: char = '.';

/// Identifier for a container, optionally nested under a parent container.
///
/// Ids are immutable once assigned. A nested id keeps its whole ancestry, so
/// `parent()` and `root()` never need the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<Box<ContainerId>>,
}

impl ContainerId {
    /// Creates a top-level container id from a string value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: None,
        }
    }

    /// Generates a random top-level container id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Creates a child id nested under `self`.
    #[must_use]
    pub fn child(&self, value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Returns this id's own segment, without ancestry.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns the parent id for nested containers.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.parent.as_deref()
    }

    /// Returns the top-level ancestor (itself for top-level ids).
    #[must_use]
    pub fn root(&self) -> &Self {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Returns whether this id is nested under another container.
    #[must_use]
    pub const fn is_nested(&self) -> bool {
        self.parent.is_some()
    }

    /// Number of ancestors above this id.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.parent().map_or(0, |p| p.depth() + 1)
    }

    /// Segments from the root down to this id.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = self.parent().map_or_else(Vec::new, Self::segments);
        segments.push(&self.value);
        segments
    }

    /// Checks that every segment is non-empty and path-safe.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::InvalidConfig`] for empty segments or segments
    /// containing separators, path components, or whitespace.
    pub fn validate(&self) -> Result<()> {
        for segment in self.segments() {
            let bad = segment.is_empty()
                || segment == ".."
                || segment
                    .chars()
                    .any(|c| c == CONTAINER_ID_SEPARATOR || c == '/' || c.is_whitespace());
            if bad {
                return Err(IsolonError::invalid_config(format!(
                    "invalid container id segment '{segment}' in {self}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}{CONTAINER_ID_SEPARATOR}")?;
        }
        write!(f, "{}", self.value)
    }
}

impl FromStr for ContainerId {
    type Err = IsolonError;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = s.split(CONTAINER_ID_SEPARATOR);
        let first = segments.next().unwrap_or_default();
        let id = segments.fold(Self::new(first), |parent, segment| parent.child(segment));
        id.validate()?;
        Ok(id)
    }
}

/// Isolation policy tag for a container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerClass {
    /// Regular workload isolation.
    #[default]
    Default,
    /// Diagnostic container with relaxed isolation.
    Debug,
}

/// Lifecycle state of a container inside the containerizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Registered, prepare pipeline running.
    Launching,
    /// Launch info merged, launcher and `isolate` calls in flight.
    Isolating,
    /// Re-registered after a restart, isolators replaying `recover`.
    Recovering,
    /// Process running under supervision.
    Running,
    /// A resource limitation was observed.
    Limited,
    /// Cleanup in progress; no further transitions except to terminated.
    Destroying,
    /// Cleanup finished and termination produced.
    Terminated,
}

impl LifecycleState {
    /// Returns whether the state machine permits `self -> next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Launching, Self::Isolating | Self::Destroying)
                | (Self::Isolating | Self::Recovering, Self::Running | Self::Destroying)
                | (Self::Running, Self::Limited | Self::Destroying)
                | (Self::Limited, Self::Destroying)
                | (Self::Destroying, Self::Terminated)
        )
    }

    /// Returns whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Launching => write!(f, "LAUNCHING"),
            Self::Isolating => write!(f, "ISOLATING"),
            Self::Recovering => write!(f, "RECOVERING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Limited => write!(f, "LIMITED"),
            Self::Destroying => write!(f, "DESTROYING"),
            Self::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Terminal task state reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Process exited successfully.
    Finished,
    /// Process failed or was terminated by a limitation.
    Failed,
    /// Container was destroyed by request.
    Killed,
    /// Container state could not be reconciled after restart.
    Lost,
}

/// Reason codes attached to terminal task status updates.
///
/// Consumed verbatim by the status reporting collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatusReason {
    /// Generic resource limitation.
    ContainerLimitation,
    /// Memory limit exceeded.
    ContainerLimitationMemory,
    /// Disk quota exceeded.
    ContainerLimitationDisk,
    /// CPU limitation.
    ContainerLimitationCpu,
    /// Launch aborted during prepare or isolate.
    ContainerLaunchFailed,
    /// Isolator state could not be recovered after restart.
    ContainerRecoveryFailed,
    /// Container destroyed by an external request.
    ContainerDestroyed,
    /// The container's process exited on its own.
    ExecutorTerminated,
}

impl TaskStatusReason {
    /// Returns whether this reason is one of the resource limitation codes.
    #[must_use]
    pub const fn is_limitation(self) -> bool {
        matches!(
            self,
            Self::ContainerLimitation
                | Self::ContainerLimitationMemory
                | Self::ContainerLimitationDisk
                | Self::ContainerLimitationCpu
        )
    }
}

/// Linux namespace kinds a container can create or join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Mount namespace.
    Mount,
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// IPC namespace.
    Ipc,
    /// UTS (hostname) namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
}

impl Namespace {
    /// All namespace kinds, in the order they are usually entered.
    pub const ALL: [Self; 7] = [
        Self::User,
        Self::Mount,
        Self::Pid,
        Self::Network,
        Self::Ipc,
        Self::Uts,
        Self::Cgroup,
    ];

    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Pid => "pid",
            Self::Network => "net",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}

/// Linux capability identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    /// Allow setting file ownership.
    Chown,
    /// Bypass file read/write/execute permission checks.
    DacOverride,
    /// Bypass permission checks on operations requiring file ownership.
    Fowner,
    /// Don't clear set-user-ID and set-group-ID bits on modification.
    Fsetid,
    /// Allow sending signals to arbitrary processes.
    Kill,
    /// Allow setting group IDs.
    Setgid,
    /// Allow setting user IDs.
    Setuid,
    /// Allow modifying the capability bounding set.
    Setpcap,
    /// Allow binding to privileged ports (< 1024).
    NetBindService,
    /// Allow raw and packet sockets.
    NetRaw,
    /// Allow network administration.
    NetAdmin,
    /// Allow `chroot(2)`.
    SysChroot,
    /// Allow `ptrace(2)` of arbitrary processes.
    SysPtrace,
    /// Broad system administration.
    SysAdmin,
    /// Allow `mknod(2)`.
    Mknod,
    /// Write audit records.
    AuditWrite,
    /// Set file capabilities.
    Setfcap,
}

/// Process resource limit kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RlimitKind {
    /// Address space size.
    As,
    /// Core file size.
    Core,
    /// CPU time in seconds.
    Cpu,
    /// Data segment size.
    Data,
    /// Largest file size.
    Fsize,
    /// Locked memory.
    Memlock,
    /// Open file descriptors.
    Nofile,
    /// Number of processes.
    Nproc,
    /// Resident set size.
    Rss,
    /// Stack size.
    Stack,
}

//! Values exchanged between the containerizer and its isolators.
//!
//! Everything here is an immutable value object once built: isolators read a
//! [`ContainerConfig`] and hand back a partial [`ContainerLaunchInfo`]; they
//! never mutate shared state in place.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IsolonError, Result};
use crate::resources::Resources;
use crate::types::{
    Capability, ContainerClass, ContainerId, Namespace, RlimitKind, TaskState, TaskStatusReason,
};

/// Descriptor of the executor owning a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    /// Executor identifier.
    pub executor_id: String,
    /// Framework the executor belongs to.
    #[serde(default)]
    pub framework_id: Option<String>,
    /// Human-readable executor name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Descriptor of the task running in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Task identifier.
    pub task_id: String,
    /// Human-readable task name.
    #[serde(default)]
    pub name: Option<String>,
}

/// A command to run, either through a shell or as an argv vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Run `value` with `/bin/sh -c` when true.
    #[serde(default)]
    pub shell: bool,
    /// Shell command line, or the executable path for argv commands.
    #[serde(default)]
    pub value: Option<String>,
    /// Arguments (argv\[0\] included) for non-shell commands.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Extra environment for this command.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// User to run the command as.
    #[serde(default)]
    pub user: Option<String>,
}

impl CommandInfo {
    /// Creates a shell command.
    #[must_use]
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            shell: true,
            value: Some(command.into()),
            ..Self::default()
        }
    }

    /// Creates an argv command; `argv[0]` is used as the executable.
    #[must_use]
    pub fn argv<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let arguments: Vec<String> = argv.into_iter().map(Into::into).collect();
        Self {
            shell: false,
            value: arguments.first().cloned(),
            arguments,
            ..Self::default()
        }
    }

    /// Returns the program and its arguments as they should be executed.
    #[must_use]
    pub fn program(&self) -> Option<(String, Vec<String>)> {
        let value = self.value.clone()?;
        if self.shell {
            return Some(("/bin/sh".into(), vec!["-c".into(), value]));
        }
        let args = self.arguments.iter().skip(1).cloned().collect();
        Some((value, args))
    }

    fn is_empty(&self) -> bool {
        self.value.as_deref().is_none_or(str::is_empty)
    }
}

/// A bind mount requested by the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: PathBuf,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Network attachment mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// Share the host network namespace.
    #[default]
    Host,
    /// Private network namespace with loopback only.
    Bridge,
}

/// Soft/hard pair for a process resource limit; `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    /// Soft limit.
    pub soft: Option<u64>,
    /// Hard limit.
    pub hard: Option<u64>,
}

impl Rlimit {
    /// Creates a limit with identical soft and hard values.
    #[must_use]
    pub const fn fixed(value: u64) -> Self {
        Self {
            soft: Some(value),
            hard: Some(value),
        }
    }

    /// Returns whether soft does not exceed hard.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match (self.soft, self.hard) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(soft), Some(hard)) => soft <= hard,
        }
    }
}

/// Mounts, network, and security settings requested for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Bind mounts.
    #[serde(default)]
    pub mounts: Vec<Mount>,
    /// Hostname inside the container's UTS namespace.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Network mode.
    #[serde(default)]
    pub network: Option<NetworkMode>,
    /// Requested capabilities; `None` means the runtime default set.
    #[serde(default)]
    pub capabilities: Option<BTreeSet<Capability>>,
    /// Requested process resource limits.
    #[serde(default)]
    pub rlimits: BTreeMap<RlimitKind, Rlimit>,
    /// Allocate a pseudo-terminal.
    #[serde(default)]
    pub tty: bool,
}

/// A v1-manifest docker image, consumed as an opaque manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerImage {
    /// Image reference, e.g. `library/alpine:3.20`.
    pub reference: String,
    /// Raw manifest.
    #[serde(default)]
    pub manifest: serde_json::Value,
}

/// An appc image, consumed as an opaque manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppcImage {
    /// Image name.
    pub name: String,
    /// Raw manifest.
    #[serde(default)]
    pub manifest: serde_json::Value,
}

/// The container's image; at most one variant can ever be populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ContainerImage {
    /// No image; the container uses the host filesystem.
    #[default]
    None,
    /// Docker v1 manifest image.
    Docker(DockerImage),
    /// Appc image.
    Appc(AppcImage),
}

impl ContainerImage {
    /// Returns whether an image is set.
    #[must_use]
    pub const fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    fn from_parts(docker: Option<DockerImage>, appc: Option<AppcImage>) -> Result<Self> {
        match (docker, appc) {
            (Some(_), Some(_)) => Err(IsolonError::invalid_config(
                "docker and appc images are mutually exclusive",
            )),
            (Some(d), None) => Ok(Self::Docker(d)),
            (None, Some(a)) => Ok(Self::Appc(a)),
            (None, None) => Ok(Self::None),
        }
    }
}

/// Immutable configuration handed to every isolator's `prepare`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireContainerConfig", into = "WireContainerConfig")]
pub struct ContainerConfig {
    /// Requested id; the containerizer generates one when absent.
    pub container_id: Option<ContainerId>,
    /// Executor owning the container.
    pub executor_info: Option<ExecutorInfo>,
    /// Task running in the container.
    pub task_info: Option<TaskInfo>,
    /// Command to launch. Required.
    pub command_info: Option<CommandInfo>,
    /// Mounts, network, and security settings.
    pub container_info: Option<ContainerInfo>,
    /// Allocated resource shares.
    pub resources: Resources,
    /// Isolation policy class.
    pub container_class: ContainerClass,
    /// Sandbox directory. Required.
    pub directory: Option<PathBuf>,
    /// User to run as.
    pub user: Option<String>,
    /// Image to provision.
    pub image: ContainerImage,
}

impl ContainerConfig {
    /// Starts a builder for a container running `command` in `directory`.
    #[must_use]
    pub fn builder(command: CommandInfo, directory: impl Into<PathBuf>) -> ContainerConfigBuilder {
        ContainerConfigBuilder::new(command, directory)
    }

    /// Checks required fields.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::InvalidConfig`] when the directory or command is
    /// missing, or when the requested container id is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.directory.as_deref().is_none_or(|d| d.as_os_str().is_empty()) {
            return Err(IsolonError::invalid_config("sandbox directory is required"));
        }
        if self.command_info.as_ref().is_none_or(CommandInfo::is_empty) {
            return Err(IsolonError::invalid_config("command is required"));
        }
        if let Some(id) = &self.container_id {
            id.validate()?;
        }
        Ok(())
    }

    /// Sandbox directory, or an empty path when absent.
    #[must_use]
    pub fn sandbox(&self) -> &Path {
        self.directory.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Container info, or the default when absent.
    #[must_use]
    pub fn container_info_or_default(&self) -> ContainerInfo {
        self.container_info.clone().unwrap_or_default()
    }

    /// Returns whether relaxed debug isolation applies.
    #[must_use]
    pub fn is_debug(&self) -> bool {
        self.container_class == ContainerClass::Debug
    }
}

/// Serialized form of [`ContainerConfig`], with the image as two optional fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_id: Option<ContainerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    executor_info: Option<ExecutorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_info: Option<TaskInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command_info: Option<CommandInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container_info: Option<ContainerInfo>,
    #[serde(default)]
    resources: Resources,
    #[serde(default)]
    container_class: ContainerClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    docker_image: Option<DockerImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    appc_image: Option<AppcImage>,
}

impl TryFrom<WireContainerConfig> for ContainerConfig {
    type Error = IsolonError;

    fn try_from(wire: WireContainerConfig) -> Result<Self> {
        Ok(Self {
            image: ContainerImage::from_parts(wire.docker_image, wire.appc_image)?,
            container_id: wire.container_id,
            executor_info: wire.executor_info,
            task_info: wire.task_info,
            command_info: wire.command_info,
            container_info: wire.container_info,
            resources: wire.resources,
            container_class: wire.container_class,
            directory: wire.directory,
            user: wire.user,
        })
    }
}

impl From<ContainerConfig> for WireContainerConfig {
    fn from(config: ContainerConfig) -> Self {
        let (docker_image, appc_image) = match config.image {
            ContainerImage::None => (None, None),
            ContainerImage::Docker(d) => (Some(d), None),
            ContainerImage::Appc(a) => (None, Some(a)),
        };
        Self {
            container_id: config.container_id,
            executor_info: config.executor_info,
            task_info: config.task_info,
            command_info: config.command_info,
            container_info: config.container_info,
            resources: config.resources,
            container_class: config.container_class,
            directory: config.directory,
            user: config.user,
            docker_image,
            appc_image,
        }
    }
}

/// Assembles a [`ContainerConfig`] from executor, task, and resource inputs.
#[derive(Debug, Clone)]
pub struct ContainerConfigBuilder {
    wire: WireContainerConfig,
}

impl ContainerConfigBuilder {
    /// Creates a builder with the two required fields.
    #[must_use]
    pub fn new(command: CommandInfo, directory: impl Into<PathBuf>) -> Self {
        Self {
            wire: WireContainerConfig {
                command_info: Some(command),
                directory: Some(directory.into()),
                ..WireContainerConfig::default()
            },
        }
    }

    /// Requests a specific container id.
    #[must_use]
    pub fn id(mut self, id: ContainerId) -> Self {
        self.wire.container_id = Some(id);
        self
    }

    /// Sets the executor descriptor.
    #[must_use]
    pub fn executor(mut self, executor: ExecutorInfo) -> Self {
        self.wire.executor_info = Some(executor);
        self
    }

    /// Sets the task descriptor.
    #[must_use]
    pub fn task(mut self, task: TaskInfo) -> Self {
        self.wire.task_info = Some(task);
        self
    }

    /// Sets mounts, network, and security settings.
    #[must_use]
    pub fn container_info(mut self, info: ContainerInfo) -> Self {
        self.wire.container_info = Some(info);
        self
    }

    /// Sets the allocated resources.
    #[must_use]
    pub fn resources(mut self, resources: Resources) -> Self {
        self.wire.resources = resources;
        self
    }

    /// Sets the container class.
    #[must_use]
    pub const fn class(mut self, class: ContainerClass) -> Self {
        self.wire.container_class = class;
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.wire.user = Some(user.into());
        self
    }

    /// Sets a docker image.
    #[must_use]
    pub fn docker_image(mut self, image: DockerImage) -> Self {
        self.wire.docker_image = Some(image);
        self
    }

    /// Sets an appc image.
    #[must_use]
    pub fn appc_image(mut self, image: AppcImage) -> Self {
        self.wire.appc_image = Some(image);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`IsolonError::InvalidConfig`] when both image variants were set
    /// or a required field is empty.
    pub fn build(self) -> Result<ContainerConfig> {
        let config = ContainerConfig::try_from(self.wire)?;
        config.validate()?;
        Ok(config)
    }
}

/// Merged output of every isolator's `prepare` for one container.
///
/// Map and set fields use ordered collections so that identical isolator
/// outputs always serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLaunchInfo {
    /// Commands run in order before the container's command.
    #[serde(default)]
    pub pre_exec_commands: Vec<CommandInfo>,
    /// Environment overlay.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Root filesystem override.
    #[serde(default)]
    pub rootfs: Option<PathBuf>,
    /// Namespaces to join from an existing process.
    #[serde(default)]
    pub enter_namespaces: Vec<Namespace>,
    /// Namespaces to create.
    #[serde(default)]
    pub clone_namespaces: Vec<Namespace>,
    /// User override.
    #[serde(default)]
    pub user: Option<String>,
    /// Working directory override.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Capabilities to retain.
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// Process resource limits.
    #[serde(default)]
    pub rlimits: BTreeMap<RlimitKind, Rlimit>,
    /// Pseudo-terminal slave path.
    #[serde(default)]
    pub tty_slave_path: Option<PathBuf>,
}

impl ContainerLaunchInfo {
    /// Returns whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Minimal facts an isolator needs to recognize a container after restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Executor descriptor; only present for checkpointed top-level containers.
    #[serde(default)]
    pub executor_info: Option<ExecutorInfo>,
    /// Container id.
    pub container_id: ContainerId,
    /// Init process id.
    pub pid: u32,
    /// Sandbox directory.
    pub directory: PathBuf,
}

/// Reconciliation input consumed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecoverInfo {
    /// Checkpointed container states.
    #[serde(default)]
    pub checkpointed: Vec<ContainerState>,
    /// Launcher-visible ids missing from the checkpoint (legacy path).
    #[serde(default)]
    pub orphan_container_ids: BTreeSet<ContainerId>,
    /// Every launcher-visible id, nested ones included.
    #[serde(default)]
    pub known_container_ids: BTreeSet<ContainerId>,
}

impl ContainerRecoverInfo {
    /// Ids of the checkpointed states.
    #[must_use]
    pub fn checkpointed_ids(&self) -> BTreeSet<ContainerId> {
        self.checkpointed
            .iter()
            .map(|s| s.container_id.clone())
            .collect()
    }

    /// Known ids that are neither checkpointed nor marked orphan.
    #[must_use]
    pub fn untracked(&self) -> BTreeSet<ContainerId> {
        let checkpointed = self.checkpointed_ids();
        self.known_container_ids
            .iter()
            .filter(|id| !checkpointed.contains(*id) && !self.orphan_container_ids.contains(*id))
            .cloned()
            .collect()
    }

    /// Repairs violated invariants instead of rejecting the input.
    ///
    /// Checkpointed ids missing from the known set are added to it, and ids
    /// both checkpointed and orphaned are treated as checkpointed. Returns the
    /// ids that needed repair.
    pub fn normalize(&mut self) -> Vec<ContainerId> {
        let mut repaired = Vec::new();
        for id in self.checkpointed_ids() {
            if self.known_container_ids.insert(id.clone()) {
                repaired.push(id.clone());
            }
            if self.orphan_container_ids.remove(&id) {
                repaired.push(id);
            }
        }
        repaired
    }
}

/// A resource-constraint violation reported by an isolator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerLimitation {
    /// Resources whose limit was hit.
    #[serde(default)]
    pub resources: Resources,
    /// Human-readable description.
    pub message: String,
    /// Reason code for the terminal status update.
    #[serde(default)]
    pub reason: Option<TaskStatusReason>,
}

impl ContainerLimitation {
    /// Creates a limitation.
    #[must_use]
    pub fn new(
        resources: Resources,
        message: impl Into<String>,
        reason: Option<TaskStatusReason>,
    ) -> Self {
        Self {
            resources,
            message: message.into(),
            reason,
        }
    }
}

/// How the container's init process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code for normal exits.
    pub code: Option<i32>,
    /// Terminating signal.
    pub signal: Option<i32>,
    /// Whether a core dump was produced.
    #[serde(default)]
    pub core_dumped: bool,
}

impl ExitStatus {
    /// A normal exit with `code`.
    #[must_use]
    pub const fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
            core_dumped: false,
        }
    }

    /// Termination by `signal`.
    #[must_use]
    pub const fn signaled(signal: i32, core_dumped: bool) -> Self {
        Self {
            code: None,
            signal: Some(signal),
            core_dumped,
        }
    }

    /// Returns whether the process exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exited with status {code}"),
            (None, Some(signal)) if self.core_dumped => {
                write!(f, "killed by signal {signal} (core dumped)")
            }
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Terminal record produced exactly once per container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTermination {
    /// Exit status of the init process, when one was reaped.
    pub status: Option<ExitStatus>,
    /// Terminal task state.
    pub state: Option<TaskState>,
    /// Reason codes, most significant first.
    pub reasons: Vec<TaskStatusReason>,
    /// Human-readable description.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ContainerConfigBuilder {
        ContainerConfig::builder(CommandInfo::shell("sleep 10"), "/var/sandbox/c1")
    }

    #[test]
    fn builder_rejects_both_images() {
        let err = base()
            .docker_image(DockerImage {
                reference: "alpine".into(),
                manifest: serde_json::Value::Null,
            })
            .appc_image(AppcImage {
                name: "alpine".into(),
                manifest: serde_json::Value::Null,
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, IsolonError::InvalidConfig { .. }));
    }

    #[test]
    fn builder_sets_single_image_variant() {
        let config = base()
            .appc_image(AppcImage {
                name: "coreos/etcd".into(),
                manifest: serde_json::json!({"acKind": "ImageManifest"}),
            })
            .build()
            .unwrap();
        assert!(matches!(config.image, ContainerImage::Appc(_)));
    }

    #[test]
    fn validate_requires_command_and_directory() {
        let mut config = base().build().unwrap();
        config.command_info = None;
        assert!(config.validate().is_err());

        let mut config = base().build().unwrap();
        config.directory = None;
        assert!(config.validate().is_err());

        let mut config = base().build().unwrap();
        config.command_info = Some(CommandInfo::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_with_both_images_is_rejected() {
        let json = r#"{
            "command_info": {"shell": true, "value": "true"},
            "directory": "/tmp/x",
            "docker_image": {"reference": "alpine"},
            "appc_image": {"name": "alpine"}
        }"#;
        assert!(serde_json::from_str::<ContainerConfig>(json).is_err());
    }

    #[test]
    fn json_roundtrip_preserves_image_variant() {
        let config = base()
            .docker_image(DockerImage {
                reference: "library/busybox".into(),
                manifest: serde_json::Value::Null,
            })
            .class(ContainerClass::Debug)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("docker_image"));
        assert!(!json.contains("appc_image"));
        let back: ContainerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn shell_command_runs_through_sh() {
        let (program, args) = CommandInfo::shell("echo hi").program().unwrap();
        assert_eq!(program, "/bin/sh");
        assert_eq!(args, vec!["-c", "echo hi"]);

        let (program, args) = CommandInfo::argv(["/bin/echo", "hi"]).program().unwrap();
        assert_eq!(program, "/bin/echo");
        assert_eq!(args, vec!["hi"]);
    }

    #[test]
    fn untracked_excludes_checkpointed_and_orphans() {
        let a = ContainerId::new("a");
        let info = ContainerRecoverInfo {
            checkpointed: vec![ContainerState {
                executor_info: None,
                container_id: a.clone(),
                pid: 10,
                directory: "/s/a".into(),
            }],
            orphan_container_ids: [ContainerId::new("b")].into(),
            known_container_ids: [a.clone(), ContainerId::new("b"), a.child("c")].into(),
        };
        let untracked: Vec<_> = info.untracked().into_iter().collect();
        assert_eq!(untracked, vec![a.child("c")]);
    }

    #[test]
    fn normalize_adds_missing_known_and_drops_checkpointed_orphans() {
        let a = ContainerId::new("a");
        let mut info = ContainerRecoverInfo {
            checkpointed: vec![ContainerState {
                executor_info: None,
                container_id: a.clone(),
                pid: 10,
                directory: "/s/a".into(),
            }],
            orphan_container_ids: [a.clone()].into(),
            known_container_ids: BTreeSet::new(),
        };
        let repaired = info.normalize();
        assert_eq!(repaired.len(), 2);
        assert!(info.known_container_ids.contains(&a));
        assert!(info.orphan_container_ids.is_empty());
    }

    #[test]
    fn rlimit_consistency() {
        assert!(Rlimit::fixed(10).is_consistent());
        assert!(Rlimit { soft: Some(5), hard: None }.is_consistent());
        assert!(!Rlimit { soft: Some(20), hard: Some(10) }.is_consistent());
        assert!(!Rlimit { soft: None, hard: Some(10) }.is_consistent());
    }

    #[test]
    fn exit_status_display() {
        assert_eq!(ExitStatus::exited(3).to_string(), "exited with status 3");
        assert_eq!(
            ExitStatus::signaled(9, true).to_string(),
            "killed by signal 9 (core dumped)"
        );
    }
}

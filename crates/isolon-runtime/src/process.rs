//! Process spawning inside isolated namespaces.
//!
//! [`ProcessLauncher`] turns a merged launch descriptor into one
//! `/bin/sh` script: pre-exec commands run in order inside the new
//! namespaces, then the container command is exec'd, wrapped by `chroot`
//! and `setpriv` when a root filesystem, user, or capability set applies.
//! Namespaces are joined and created from the forked child before exec.
//!
//! Every process starts parked on a pipe inherited as fd 3 and only runs
//! its script once [`Launcher::release`] closes the write end, so cgroup
//! placement by the isolators happens before any workload process forks.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use isolon_common::error::{IsolonError, Result};
use isolon_common::protocol::{CommandInfo, ContainerConfig, ContainerLaunchInfo, ExitStatus, Rlimit};
use isolon_common::types::{ContainerId, Namespace, RlimitKind};
use isolon_core::capability;
use isolon_core::namespace::sys;
use nix::fcntl::OFlag;
use nix::sys::resource::Resource;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::launcher::Launcher;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);
/// Descriptor the parked process reads its release from.
const GATE_FD: i32 = 3;

struct ChildHandle {
    pid: u32,
    kill: CancellationToken,
    status: watch::Receiver<Option<ExitStatus>>,
    /// Write end of the gate; dropping it releases the process.
    gate: Option<OwnedFd>,
}

/// Launcher backed by `tokio::process`.
pub struct ProcessLauncher {
    children: DashMap<ContainerId, ChildHandle>,
    poll_interval: Duration,
}

impl ProcessLauncher {
    /// Creates a launcher with no known processes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            children: DashMap::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets how often processes this launcher did not spawn are polled.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn wait_gone(&self, pid: u32, deadline: Option<tokio::time::Instant>) -> bool {
        while pid != 0 && sys::is_alive(pid) {
            if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        true
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

/// Quotes `arg` for `/bin/sh` unless it only holds safe characters.
#[must_use]
pub fn quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn render_command(command: &CommandInfo) -> Result<String> {
    let (program, args) = command
        .program()
        .ok_or_else(|| IsolonError::invalid_config("command has no executable"))?;
    let env = command
        .environment
        .iter()
        .map(|(k, v)| format!("{k}={}", quote(v)));
    let argv = std::iter::once(program).chain(args).map(|a| quote(&a));
    Ok(env.chain(argv).collect::<Vec<_>>().join(" "))
}

/// Resolved numeric identity for the container command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
}

fn resolve_identity(user: &str) -> Result<Identity> {
    if let Ok(uid) = user.parse::<u32>() {
        return Ok(Identity { uid, gid: uid });
    }
    let found = nix::unistd::User::from_name(user).map_err(|e| IsolonError::Launcher {
        message: format!("failed to look up user '{user}': {e}"),
    })?;
    let user_info = found.ok_or_else(|| IsolonError::Launcher {
        message: format!("unknown user '{user}'"),
    })?;
    Ok(Identity {
        uid: user_info.uid.as_raw(),
        gid: user_info.gid.as_raw(),
    })
}

/// Renders the shell script that runs pre-exec commands and execs the
/// container command.
///
/// `bounding_set` is a `setpriv` bounding-set specification; it is only
/// passed when the runtime may change capabilities.
///
/// # Errors
///
/// Returns an error if a command has no executable.
pub fn render_script(
    command: &CommandInfo,
    launch_info: &ContainerLaunchInfo,
    identity: Option<Identity>,
    bounding_set: Option<&str>,
) -> Result<String> {
    let mut lines = vec!["set -e".to_string()];
    if launch_info.clone_namespaces.contains(&Namespace::Mount) {
        lines.push("mount --make-rprivate /".into());
    }
    for pre in &launch_info.pre_exec_commands {
        lines.push(render_command(pre)?);
    }

    let main = render_command(command)?;
    let mut setpriv = Vec::new();
    if let Some(spec) = bounding_set {
        setpriv.push(format!("--bounding-set={spec}"));
    }

    let exec = if let Some(rootfs) = &launch_info.rootfs {
        let workdir = launch_info
            .working_directory
            .as_deref()
            .map_or_else(|| "/".to_string(), |p| p.to_string_lossy().into_owned());
        let inner = format!("cd {} && exec {main}", quote(&workdir));
        let userspec = identity
            .map(|id| format!("--userspec={}:{} ", id.uid, id.gid))
            .unwrap_or_default();
        format!(
            "chroot {userspec}{} /bin/sh -c {}",
            quote(&rootfs.to_string_lossy()),
            quote(&inner)
        )
    } else {
        if let Some(id) = identity {
            setpriv.push(format!("--reuid={}", id.uid));
            setpriv.push(format!("--regid={}", id.gid));
            setpriv.push("--init-groups".into());
        }
        main
    };

    if setpriv.is_empty() {
        lines.push(format!("exec {exec}"));
    } else {
        lines.push(format!("exec setpriv {} -- {exec}", setpriv.join(" ")));
    }
    Ok(lines.join("\n"))
}

/// Wraps `script` so it first blocks on the gate descriptor.
///
/// With `fork_pid` the gated shell execs a forking `unshare` that becomes
/// the new PID namespace's init, so the pid handed to the isolators is the
/// one the workload forks from.
#[must_use]
pub fn gate_script(script: &str, fork_pid: bool) -> String {
    let body = if fork_pid {
        format!(
            "exec unshare --pid --fork --kill-child -- /bin/sh -c {}",
            quote(script)
        )
    } else {
        script.to_string()
    };
    format!("read -r _ <&{GATE_FD} || true\nexec {GATE_FD}<&-\n{body}")
}

const fn rlimit_resource(kind: RlimitKind) -> Resource {
    match kind {
        RlimitKind::As => Resource::RLIMIT_AS,
        RlimitKind::Core => Resource::RLIMIT_CORE,
        RlimitKind::Cpu => Resource::RLIMIT_CPU,
        RlimitKind::Data => Resource::RLIMIT_DATA,
        RlimitKind::Fsize => Resource::RLIMIT_FSIZE,
        RlimitKind::Memlock => Resource::RLIMIT_MEMLOCK,
        RlimitKind::Nofile => Resource::RLIMIT_NOFILE,
        RlimitKind::Nproc => Resource::RLIMIT_NPROC,
        RlimitKind::Rss => Resource::RLIMIT_RSS,
        RlimitKind::Stack => Resource::RLIMIT_STACK,
    }
}

fn rlimit_values(limit: Rlimit) -> (libc::rlim_t, libc::rlim_t) {
    (
        limit.soft.unwrap_or(libc::RLIM_INFINITY),
        limit.hard.unwrap_or(libc::RLIM_INFINITY),
    )
}

/// Converts an OS exit status, keeping signal and core-dump details.
#[must_use]
pub fn classify(status: std::process::ExitStatus) -> ExitStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitStatus::exited(code),
        (None, Some(signal)) => ExitStatus::signaled(signal, status.core_dumped()),
        (None, None) => ExitStatus::default(),
    }
}

async fn supervise(
    id: ContainerId,
    mut child: Child,
    kill: CancellationToken,
    status_tx: watch::Sender<Option<ExitStatus>>,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        () = kill.cancelled() => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(id = %id, error = %e, "kill failed, process already gone");
            }
            child.wait().await
        }
    };
    let status = match status {
        Ok(status) => classify(status),
        Err(e) => {
            tracing::warn!(id = %id, error = %e, "failed to collect exit status");
            ExitStatus::default()
        }
    };
    tracing::info!(id = %id, status = %status, "container process exited");
    let _ = status_tx.send_replace(Some(status));
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(
        &self,
        id: &ContainerId,
        config: &ContainerConfig,
        launch_info: &ContainerLaunchInfo,
    ) -> Result<u32> {
        let command = config
            .command_info
            .as_ref()
            .ok_or_else(|| IsolonError::invalid_config("command is required"))?;

        let user = launch_info.user.as_deref().or(config.user.as_deref());
        let identity = user.map(resolve_identity).transpose()?;
        let is_root = nix::unistd::geteuid().is_root();
        let bounding_set = (is_root && !launch_info.capabilities.is_empty())
            .then(|| capability::bounding_set(&launch_info.capabilities));
        if !is_root && !launch_info.capabilities.is_empty() {
            tracing::debug!(id = %id, "not root, leaving capability bounding set untouched");
        }
        let script = render_script(command, launch_info, identity, bounding_set.as_deref())?;

        let enter = if launch_info.enter_namespaces.is_empty() {
            Vec::new()
        } else {
            let parent_pid = id
                .parent()
                .and_then(|parent| self.pid(parent))
                .ok_or_else(|| IsolonError::Launcher {
                    message: format!("no parent process to join namespaces for {id}"),
                })?;
            sys::open(parent_pid, &launch_info.enter_namespaces)?
        };
        let fork_pid = launch_info.clone_namespaces.contains(&Namespace::Pid);
        let unshare: Vec<Namespace> = launch_info
            .clone_namespaces
            .iter()
            .copied()
            .filter(|ns| *ns != Namespace::Pid)
            .collect();
        let limits: Vec<_> = launch_info
            .rlimits
            .iter()
            .map(|(kind, limit)| {
                let (soft, hard) = rlimit_values(*limit);
                (rlimit_resource(*kind), soft, hard)
            })
            .collect();

        let (gate_read, gate_write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| {
            IsolonError::Launcher {
                message: format!("failed to create launch gate for {id}: {e}"),
            }
        })?;
        let gate_fd = gate_read.as_raw_fd();

        // A new PID namespace only applies to children of the caller, so the
        // gated shell hands over to a forking `unshare`.
        let mut cmd = Command::new("/bin/sh");
        let _ = cmd
            .arg("-c")
            .arg(gate_script(&script, fork_pid))
            .envs(&command.environment)
            .envs(&launch_info.environment)
            .kill_on_drop(false);

        if launch_info.rootfs.is_none() {
            let workdir = launch_info
                .working_directory
                .as_deref()
                .unwrap_or_else(|| config.sandbox());
            let _ = cmd.current_dir(workdir);
        }

        if let Some(tty) = &launch_info.tty_slave_path {
            let open = || {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(tty)
                    .map_err(|e| IsolonError::Io {
                        path: tty.clone(),
                        source: e,
                    })
            };
            let _ = cmd.stdin(open()?).stdout(open()?).stderr(open()?);
        } else {
            let _ = cmd.stdin(Stdio::null());
        }

        // SAFETY: the closure runs in the forked child before exec and only
        // issues setns(2), unshare(2), setrlimit(2), dup2(2), and fcntl(2) on
        // values prepared before the fork; it does not allocate or take locks.
        // The gate moves to its fixed slot last so it cannot clobber the
        // namespace descriptors.
        unsafe {
            let _ = cmd.pre_exec(move || {
                sys::enter(&enter)?;
                sys::unshare(&unshare)?;
                for (resource, soft, hard) in &limits {
                    nix::sys::resource::setrlimit(*resource, *soft, *hard)
                        .map_err(std::io::Error::from)?;
                }
                let moved = if gate_fd == GATE_FD {
                    libc::fcntl(GATE_FD, libc::F_SETFD, 0)
                } else {
                    libc::dup2(gate_fd, GATE_FD)
                };
                if moved < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| IsolonError::Launcher {
            message: format!("failed to spawn container {id}: {e}"),
        })?;
        drop(gate_read);
        let pid = child.id().ok_or_else(|| IsolonError::Launcher {
            message: format!("container {id} exited before its pid was read"),
        })?;

        let kill = CancellationToken::new();
        let (status_tx, status) = watch::channel(None);
        drop(tokio::spawn(supervise(id.clone(), child, kill.clone(), status_tx)));
        let _ = self.children.insert(
            id.clone(),
            ChildHandle {
                pid,
                kill,
                status,
                gate: Some(gate_write),
            },
        );
        tracing::info!(id = %id, pid, "container process spawned, parked on its gate");
        Ok(pid)
    }

    async fn wait(&self, id: &ContainerId, pid: u32) -> Result<ExitStatus> {
        if let Some(mut status) = self.children.get(id).map(|h| h.status.clone()) {
            let exited = status.wait_for(Option::is_some).await.ok().and_then(|s| *s);
            return Ok(exited.unwrap_or_default());
        }
        let _ = self.wait_gone(pid, None).await;
        Ok(ExitStatus::default())
    }

    async fn reap(&self, id: &ContainerId, pid: u32) -> Result<ExitStatus> {
        if let Some((_, handle)) = self.children.remove(id) {
            handle.kill.cancel();
            let mut status = handle.status;
            let exited = status.wait_for(Option::is_some).await.ok().and_then(|s| *s);
            return Ok(exited.unwrap_or_default());
        }

        if pid == 0 || !sys::is_alive(pid) {
            return Ok(ExitStatus::default());
        }
        let raw = i32::try_from(pid).map_err(|_| IsolonError::Launcher {
            message: format!("pid {pid} out of range"),
        })?;
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(raw),
            nix::sys::signal::Signal::SIGKILL,
        )
        .map_err(|e| IsolonError::Launcher {
            message: format!("failed to kill pid {pid} of {id}: {e}"),
        })?;
        let deadline = tokio::time::Instant::now() + REAP_TIMEOUT;
        if !self.wait_gone(pid, Some(deadline)).await {
            return Err(IsolonError::Launcher {
                message: format!("pid {pid} of {id} survived SIGKILL"),
            });
        }
        tracing::info!(id = %id, pid, "killed process not spawned by this launcher");
        Ok(ExitStatus::signaled(libc::SIGKILL, false))
    }

    fn release(&self, id: &ContainerId) -> Result<()> {
        let mut handle = self.children.get_mut(id).ok_or_else(|| IsolonError::Launcher {
            message: format!("no process to release for {id}"),
        })?;
        if handle.gate.take().is_some() {
            tracing::debug!(id = %id, pid = handle.pid, "container process released");
        }
        Ok(())
    }

    fn pid(&self, id: &ContainerId) -> Option<u32> {
        self.children.get(id).map(|h| h.pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isolon_common::types::Capability;
    use std::path::PathBuf;

    #[test]
    fn quote_leaves_safe_words_alone() {
        assert_eq!(quote("/bin/true"), "/bin/true");
        assert_eq!(quote("a b"), "'a b'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn script_runs_pre_exec_then_execs() {
        let info = ContainerLaunchInfo {
            clone_namespaces: vec![Namespace::Mount],
            pre_exec_commands: vec![CommandInfo::argv(["hostname", "box"])],
            ..ContainerLaunchInfo::default()
        };
        let script = render_script(&CommandInfo::shell("echo hi"), &info, None, None).expect("script");
        let lines: Vec<_> = script.lines().collect();
        assert_eq!(
            lines,
            vec![
                "set -e",
                "mount --make-rprivate /",
                "hostname box",
                "exec /bin/sh -c 'echo hi'"
            ]
        );
    }

    #[test]
    fn rootfs_and_identity_wrap_with_chroot() {
        let info = ContainerLaunchInfo {
            rootfs: Some(PathBuf::from("/r")),
            working_directory: Some(PathBuf::from("/mnt/sandbox")),
            ..ContainerLaunchInfo::default()
        };
        let identity = Identity { uid: 1000, gid: 100 };
        let spec = capability::bounding_set(&[Capability::Kill].into());
        let script = render_script(&CommandInfo::argv(["/app"]), &info, Some(identity), Some(&spec))
            .expect("script");
        assert_eq!(
            script.lines().last(),
            Some("exec setpriv --bounding-set=-all,+kill -- chroot --userspec=1000:100 /r /bin/sh -c 'cd /mnt/sandbox && exec /app'")
        );
    }

    #[tokio::test]
    async fn launches_waits_and_reaps() {
        let sandbox = tempfile::tempdir().expect("tempdir");
        let launcher = ProcessLauncher::new();
        let id = ContainerId::new("proc");
        let config = ContainerConfig::builder(CommandInfo::shell("exit 3"), sandbox.path())
            .build()
            .expect("config");

        let pid = launcher
            .launch(&id, &config, &ContainerLaunchInfo::default())
            .await
            .expect("launch");
        assert_eq!(launcher.pid(&id), Some(pid));
        launcher.release(&id).expect("release");

        let status = launcher.wait(&id, pid).await.expect("wait");
        assert_eq!(status, ExitStatus::exited(3));
        assert_eq!(launcher.reap(&id, pid).await.expect("reap"), status);
        assert_eq!(launcher.pid(&id), None);
    }

    #[test]
    fn gate_comes_before_the_script() {
        let plain = gate_script("set -e\nexec true", false);
        assert_eq!(
            plain.lines().collect::<Vec<_>>(),
            vec!["read -r _ <&3 || true", "exec 3<&-", "set -e", "exec true"]
        );

        let forked = gate_script("exec true", true);
        assert_eq!(
            forked.lines().last(),
            Some("exec unshare --pid --fork --kill-child -- /bin/sh -c 'exec true'")
        );
    }

    #[tokio::test]
    async fn process_waits_for_release() {
        let sandbox = tempfile::tempdir().expect("tempdir");
        let marker = sandbox.path().join("started");
        let launcher = ProcessLauncher::new();
        let id = ContainerId::new("parked");
        let touch = CommandInfo::argv(["touch".to_string(), marker.to_string_lossy().into_owned()]);
        let config = ContainerConfig::builder(touch, sandbox.path())
            .build()
            .expect("config");

        let pid = launcher
            .launch(&id, &config, &ContainerLaunchInfo::default())
            .await
            .expect("launch");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!marker.exists());
        assert!(sys::is_alive(pid));

        launcher.release(&id).expect("release");
        let status = launcher.wait(&id, pid).await.expect("wait");
        assert_eq!(status, ExitStatus::exited(0));
        assert!(marker.exists());
    }

    #[test]
    fn release_of_unknown_container_fails() {
        let launcher = ProcessLauncher::new();
        assert!(launcher.release(&ContainerId::new("nobody")).is_err());
    }

    #[tokio::test]
    async fn reap_kills_running_process() {
        let sandbox = tempfile::tempdir().expect("tempdir");
        let launcher = ProcessLauncher::new();
        let id = ContainerId::new("sleeper");
        let config = ContainerConfig::builder(CommandInfo::argv(["sleep", "30"]), sandbox.path())
            .build()
            .expect("config");
        let pid = launcher
            .launch(&id, &config, &ContainerLaunchInfo::default())
            .await
            .expect("launch");
        let status = launcher.reap(&id, pid).await.expect("reap");
        assert_eq!(status.signal, Some(libc::SIGKILL));
    }
}

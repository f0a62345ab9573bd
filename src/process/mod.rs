//! Subprocess invocation with a hard timeout and two-phase termination.
//!
//! Every external program the daemon runs (agent stages, git, the tracker
//! CLI) goes through [`spawn_with_timeout`]. A non-zero exit or an expired
//! timeout is reported in [`SpawnOutput`], never as an error; only a failure
//! to start the program is.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(10);

/// How long captured output may stay open after the child is gone.
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

/// Environment variables forwarded to child processes.
/// Only functional variables are included -- never tokens or secrets.
pub const SAFE_ENV_VARS: &[&str] = &["HOME", "PATH", "USER", "LANG", "SHELL", "TERM"];

#[derive(Debug, Clone)]
pub struct SpawnOptions {
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    /// When set, the child starts from an empty environment plus these entries.
    pub env: Option<HashMap<String, String>>,
    /// Cancelling the token terminates the child like an expired timeout.
    pub cancel: Option<CancellationToken>,
}

impl SpawnOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cwd: None,
            env: None,
            cancel: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was ended by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl SpawnOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `program` with `args`, capturing output, bounded by `options.timeout`.
pub async fn spawn_with_timeout(
    program: &str,
    args: &[String],
    options: &SpawnOptions,
) -> Result<SpawnOutput, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .process_group(0);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = &options.env {
        cmd.env_clear().envs(env);
    }

    let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;
    // The child leads its own process group, so its pid is also the group id.
    let group = child.id();
    let stdout = tokio::spawn(read_all(child.stdout.take()));
    let stderr = tokio::spawn(read_all(child.stderr.take()));

    let cancelled = async {
        match &options.cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        () = tokio::time::sleep(options.timeout) => Outcome::TimedOut,
        () = cancelled => Outcome::Cancelled,
    };

    let (status, timed_out, cancelled) = match outcome {
        Outcome::Exited(status) => (status.ok(), false, false),
        Outcome::TimedOut => {
            tracing::warn!(program, timeout_ms = options.timeout.as_millis() as u64, "process timed out");
            (terminate(&mut child, group).await, true, false)
        }
        Outcome::Cancelled => {
            tracing::info!(program, "process cancelled");
            (terminate(&mut child, group).await, false, true)
        }
    };
    // Nothing the child started may outlive it or hold its pipes open.
    signal_group(group, Signal::SIGKILL);

    Ok(SpawnOutput {
        stdout: collect_output(stdout).await,
        stderr: collect_output(stderr).await,
        exit_code: status.and_then(|s| s.code()),
        timed_out,
        cancelled,
    })
}

/// SIGTERM to the whole group, wait up to [`KILL_GRACE`], then SIGKILL.
async fn terminate(child: &mut Child, group: Option<u32>) -> Option<ExitStatus> {
    signal_group(group, Signal::SIGTERM);

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => status.ok(),
        Err(_) => {
            tracing::warn!(pid = group, "process ignored SIGTERM, sending SIGKILL");
            signal_group(group, Signal::SIGKILL);
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "SIGKILL delivery failed");
            }
            child.wait().await.ok()
        }
    }
}

fn signal_group(group: Option<u32>, signal: Signal) {
    let Some(pgid) = group.and_then(|pid| to_pid(pid).ok()) else {
        return;
    };
    match killpg(pgid, signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => tracing::debug!(pgid = %pgid, %signal, error = %e, "group signal failed"),
    }
}

async fn collect_output(reader: JoinHandle<String>) -> String {
    let abort = reader.abort_handle();
    match tokio::time::timeout(OUTPUT_DRAIN, reader).await {
        Ok(output) => output.unwrap_or_default(),
        Err(_) => {
            abort.abort();
            tracing::warn!("child output still open after exit, discarding it");
            String::new()
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "failed to read child output");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn to_pid(pid: u32) -> Result<Pid, ProcessError> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| ProcessError::Signal(format!("pid {pid} out of range")))
}

pub fn send_signal(pid: u32, signal: Signal) -> Result<(), ProcessError> {
    kill(to_pid(pid)?, signal).map_err(|e| ProcessError::Signal(format!("{signal} to {pid}: {e}")))
}

/// Whether `pid` refers to a live process (signal 0 probe).
pub fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    matches!(kill(pid, None), Ok(()) | Err(nix::errno::Errno::EPERM))
}

/// Allow-listed subset of the current environment.
pub fn safe_env() -> HashMap<String, String> {
    SAFE_ENV_VARS
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|val| ((*key).to_string(), val)))
        .collect()
}

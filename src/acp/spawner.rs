//! ACP agent process spawner.
//!
//! Resolves the launch command from configuration and spawns it through the
//! platform shell with all three stdio streams piped and `kill_on_drop(true)`
//! so an abandoned child never outlives its supervisor.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

/// Launch command used when configuration names none.
pub const DEFAULT_LAUNCH_COMMAND: &str = "buffer --acp";

/// Argument appended when only a `command` is configured.
pub const DEFAULT_AGENT_ARG: &str = "--acp";

// ── Configuration ────────────────────────────────────────────────────────────

/// Fully resolved spawn parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Shell command line.
    pub command: String,
    /// Working directory of the child.
    pub cwd: PathBuf,
}

/// Resolve the shell command line.
///
/// Priority: a non-blank `launch_command`; else `command` followed by `args`
/// (default `--acp` when `args` is absent); else [`DEFAULT_LAUNCH_COMMAND`].
#[must_use]
pub fn resolve_launch_command(
    launch_command: Option<&str>,
    command: Option<&str>,
    args: Option<&[String]>,
) -> String {
    if let Some(launch) = launch_command.map(str::trim).filter(|s| !s.is_empty()) {
        return launch.to_owned();
    }

    if let Some(command) = command.map(str::trim).filter(|s| !s.is_empty()) {
        let args = args.map_or_else(|| DEFAULT_AGENT_ARG.to_owned(), |args| args.join(" "));
        return format!("{command} {args}").trim_end().to_owned();
    }

    DEFAULT_LAUNCH_COMMAND.to_owned()
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A freshly spawned agent with its stdio captured.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle (`kill_on_drop`).
    pub child: Child,
    /// Agent's stdin: host → agent messages.
    pub stdin: ChildStdin,
    /// Agent's stdout: agent → host messages.
    pub stdout: ChildStdout,
    /// Agent's stderr: free-form diagnostics.
    pub stderr: ChildStderr,
}

/// Spawn the agent described by `config`.
///
/// # Errors
///
/// - `AppError::Process("failed to spawn agent: …")`: OS spawn failure.
/// - `AppError::Process("failed to capture agent …")`: a pipe is missing.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = shell_command(&config.command);
    cmd.current_dir(&config.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Process("failed to capture agent stderr".into()))?;

    info!(
        command = %config.command,
        cwd = %config.cwd.display(),
        pid = child.id(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Describe an exit status as `ACP process exited (code=…, signal=…)`.
#[must_use]
pub fn describe_exit(status: ExitStatus) -> String {
    let code = status
        .code()
        .map_or_else(|| "null".to_owned(), |c| c.to_string());
    let signal = exit_signal(status).map_or_else(|| "null".to_owned(), |s| s.to_string());
    format!("ACP process exited (code={code}, signal={signal})")
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

// ── Tests ─────────────────────────────────────────────────────────────────────

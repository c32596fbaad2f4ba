//! CLI process supervisor.
//!
//! Launches the Copilot CLI in server mode with:
//! - command resolution for `.js` entry points (run through `node`) and, on
//!   Windows, `cmd /c` indirection for non-absolute paths so `PATH` lookup
//!   and `.cmd` shims work.
//! - arguments derived from [`ClientOptions`] (transport, log level, auth).
//! - a controlled environment: an optional full replacement map, `NODE_DEBUG`
//!   always removed, the GitHub token passed via [`AUTH_TOKEN_ENV`].
//! - `kill_on_drop(true)` so a dropped handle never leaks the process.
//!
//! In socket mode the supervisor waits for a [`ReadinessProbe`] within the
//! configured startup deadline. A timeout or premature EOF force-kills the
//! child and returns [`ClientError::Startup`]. Stderr is drained on a
//! background task for the lifetime of the process.

pub mod readiness;

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use readiness::{PortAnnouncement, ReadinessProbe};

use crate::config::ClientOptions;
use crate::{ClientError, Result};

/// Environment variable carrying the GitHub token into the child.
pub const AUTH_TOKEN_ENV: &str = "COPILOT_SDK_AUTH_TOKEN";

/// Log target for child process output.
pub const CLI_LOG_TARGET: &str = "copilot_client::cli";

/// Time a cooperatively terminated process gets before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

// ── Command line ─────────────────────────────────────────────────────────────

/// Program plus argument vector, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable to launch.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
}

/// Build the CLI argument vector from `options`.
///
/// Layout: `<cli_args...> --server --log-level <level>`, then `--stdio` or
/// `--port <n>` (only when `port > 0`), then auth flags.
#[must_use]
pub fn build_args(options: &ClientOptions) -> Vec<String> {
    let mut args = options.cli_args.clone();
    args.extend(["--server".into(), "--log-level".into(), options.log_level.clone()]);

    if options.use_stdio {
        args.push("--stdio".into());
    } else if options.port > 0 {
        args.extend(["--port".into(), options.port.to_string()]);
    }

    if has_token(options) {
        args.extend(["--auth-token-env".into(), AUTH_TOKEN_ENV.into()]);
    }
    if !options.resolved_use_logged_in_user() {
        args.push("--no-auto-login".into());
    }
    args
}

/// Resolve how to launch `cli_path` on the current platform.
#[must_use]
pub fn resolve_command(cli_path: &str, args: Vec<String>) -> CommandLine {
    resolve_command_on(cli_path, args, cfg!(windows))
}

fn resolve_command_on(cli_path: &str, args: Vec<String>, windows: bool) -> CommandLine {
    let is_script = std::path::Path::new(cli_path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("js"));

    if is_script {
        let mut full = vec![cli_path.to_owned()];
        full.extend(args);
        return CommandLine {
            program: "node".into(),
            args: full,
        };
    }

    if windows && !is_absolute_windows(cli_path) {
        let mut full = vec!["/c".to_owned(), cli_path.to_owned()];
        full.extend(args);
        return CommandLine {
            program: "cmd".into(),
            args: full,
        };
    }

    CommandLine {
        program: cli_path.to_owned(),
        args,
    }
}

fn is_absolute_windows(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with("\\\\")
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

fn has_token(options: &ClientOptions) -> bool {
    options.github_token.as_deref().is_some_and(|t| !t.is_empty())
}

// ── Process handle ───────────────────────────────────────────────────────────

/// How the client reaches a freshly spawned CLI.
#[derive(Debug)]
pub enum CliTransport {
    /// Frames flow over the child's stdin/stdout.
    Stdio {
        /// Child stdin (outbound frames).
        stdin: ChildStdin,
        /// Child stdout (inbound frames).
        stdout: ChildStdout,
    },
    /// Frames flow over a TCP socket on localhost.
    Tcp {
        /// Port announced by the child.
        port: u16,
    },
}

/// Owned handle to a running CLI process.
#[derive(Debug)]
pub struct CliProcess {
    child: Child,
    drains: Vec<JoinHandle<()>>,
    // Held open in socket mode so the child never sees stdin EOF.
    stdin: Option<ChildStdin>,
}

impl CliProcess {
    /// OS process id, while the process is running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the process has exited.
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit, killing it after `grace`.
    ///
    /// On Unix this sends `SIGTERM` first; elsewhere it kills immediately.
    pub async fn terminate(&mut self, grace: Duration) {
        if self.has_exited() {
            self.abort_drains();
            return;
        }

        if send_sigterm(&self.child) {
            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(Ok(status)) => {
                    info!(%status, "cli process exited");
                    self.abort_drains();
                    return;
                }
                Ok(Err(err)) => warn!(error = %err, "error waiting for cli process"),
                Err(_elapsed) => warn!(?grace, "cli process ignored SIGTERM, killing"),
            }
        }

        self.force_kill();
        if let Err(err) = self.child.wait().await {
            debug!(error = %err, "error reaping cli process");
        }
    }

    /// Kill the process without waiting. Safe if it already exited.
    pub fn force_kill(&mut self) {
        if let Err(err) = self.child.start_kill() {
            debug!(error = %err, "cli process kill failed (already exited?)");
        }
        self.abort_drains();
    }

    fn abort_drains(&mut self) {
        self.stdin = None;
        for task in self.drains.drain(..) {
            task.abort();
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, error = %err, "SIGTERM failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn the CLI described by `options` and wait until it is reachable.
///
/// # Errors
///
/// - `ClientError::Startup("failed to spawn cli: …")` on OS spawn failure.
/// - `ClientError::Startup("timed out …")` when the readiness deadline
///   elapses; the child is killed first.
/// - Any error returned by `probe`, such as EOF before readiness; the child
///   is killed first.
pub async fn spawn_cli(
    options: &ClientOptions,
    probe: &dyn ReadinessProbe,
) -> Result<(CliProcess, CliTransport)> {
    let line = resolve_command(&options.cli_path, build_args(options));
    debug!(program = %line.program, args = ?line.args, "spawning cli");

    let mut cmd = Command::new(&line.program);
    cmd.args(&line.args);

    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = &options.environment {
        cmd.env_clear();
        cmd.envs(env);
    }
    cmd.env_remove("NODE_DEBUG");
    if let Some(token) = options.github_token.as_deref().filter(|t| !t.is_empty()) {
        cmd.env(AUTH_TOKEN_ENV, token);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| ClientError::Startup(format!("failed to spawn cli: {err}")))?;
    info!(pid = child.id(), "cli process spawned");

    let mut drains = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        drains.push(drain_lines(stderr, "stderr"));
    }

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ClientError::Startup("failed to capture cli stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::Startup("failed to capture cli stdout".into()))?;

    if options.use_stdio {
        let process = CliProcess {
            child,
            drains,
            stdin: None,
        };
        return Ok((process, CliTransport::Stdio { stdin, stdout }));
    }

    let mut process = CliProcess {
        child,
        drains,
        stdin: Some(stdin),
    };
    let mut reader = BufReader::new(stdout);
    let timeout = options.startup_timeout();

    let port = match tokio::time::timeout(timeout, probe.wait_ready(&mut reader)).await {
        Ok(Ok(port)) => port,
        Ok(Err(err)) => {
            process.force_kill();
            return Err(err);
        }
        Err(_elapsed) => {
            process.force_kill();
            return Err(ClientError::Startup(format!(
                "timed out waiting for cli to announce its port within {timeout:?}"
            )));
        }
    };

    // Socket mode: keep stdout drained so the child never blocks on it.
    process.drains.push(drain_lines(reader, "stdout"));
    Ok((process, CliTransport::Tcp { port }))
}

/// Log every line of `stream` at `DEBUG` until EOF.
fn drain_lines<R>(stream: R, name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(target: CLI_LOG_TARGET, stream = name, "{line}"),
                Ok(None) => break,
                Err(err) => {
                    debug!(target: CLI_LOG_TARGET, stream = name, error = %err, "read failed");
                    break;
                }
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

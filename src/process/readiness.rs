//! Readiness detection for socket-mode CLI processes.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

use crate::process::CLI_LOG_TARGET;
use crate::{ClientError, Result};

/// Pattern the CLI prints once its socket listener is up.
pub const PORT_ANNOUNCEMENT_PATTERN: &str = r"(?i)listening on port (\d+)";

/// Awaits a process's "ready" signal on its output stream.
///
/// The supervisor bounds every call with its startup deadline; probes only
/// decide what counts as ready.
pub trait ReadinessProbe: Send + Sync {
    /// Consume `output` until the process reports readiness.
    ///
    /// Returns the TCP port the process is listening on.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Startup`] when the stream ends or fails before
    /// readiness is reported.
    fn wait_ready<'a>(
        &'a self,
        output: &'a mut (dyn AsyncBufRead + Send + Unpin),
    ) -> BoxFuture<'a, Result<u16>>;
}

/// Line-oriented probe matching a port announcement regex.
#[derive(Debug, Clone)]
pub struct PortAnnouncement {
    pattern: Regex,
}

impl PortAnnouncement {
    /// Probe using [`PORT_ANNOUNCEMENT_PATTERN`].
    ///
    /// # Errors
    ///
    /// Never fails in practice; see [`with_pattern`](Self::with_pattern).
    pub fn new() -> Result<Self> {
        Self::with_pattern(PORT_ANNOUNCEMENT_PATTERN)
    }

    /// Probe using a custom pattern whose first capture group is the port.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `pattern` is not a valid regex.
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|err| ClientError::Config(format!("invalid readiness pattern: {err}")))?;
        Ok(Self { pattern })
    }

    /// Extract the announced port from one output line.
    #[must_use]
    pub fn match_line(&self, line: &str) -> Option<u16> {
        self.pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|port| port.as_str().parse().ok())
    }
}

impl ReadinessProbe for PortAnnouncement {
    fn wait_ready<'a>(
        &'a self,
        output: &'a mut (dyn AsyncBufRead + Send + Unpin),
    ) -> BoxFuture<'a, Result<u16>> {
        async move {
            let mut line = String::new();
            loop {
                line.clear();
                let read = output
                    .read_line(&mut line)
                    .await
                    .map_err(|err| ClientError::Startup(format!("failed to read cli output: {err}")))?;
                if read == 0 {
                    return Err(ClientError::Startup(
                        "cli process exited before announcing its port".into(),
                    ));
                }
                if let Some(port) = self.match_line(&line) {
                    info!(port, "cli announced listening port");
                    return Ok(port);
                }
                debug!(target: CLI_LOG_TARGET, line = line.trim_end(), "cli stdout");
            }
        }
        .boxed()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

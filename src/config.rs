//! Client options parsing, validation, and credential loading.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ClientError, Result};

/// Keychain service name used when looking up a stored GitHub token.
pub const KEYRING_SERVICE: &str = "copilot-client";

/// Environment variables consulted, in order, for a GitHub token.
pub const TOKEN_ENV_VARS: &[&str] = &["COPILOT_GITHUB_TOKEN", "GH_TOKEN", "GITHUB_TOKEN"];

fn default_cli_path() -> String {
    "copilot".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    30
}

fn default_destroy_timeout() -> u64 {
    5
}

/// Options controlling how the client launches or reaches the CLI server.
///
/// All fields have defaults, so an empty TOML document is a valid
/// configuration that spawns `copilot` over stdio.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ClientOptions {
    /// Path to the CLI executable or a `.js` entry point.
    #[serde(default = "default_cli_path")]
    pub cli_path: String,
    /// Extra arguments placed before the generated flags.
    pub cli_args: Vec<String>,
    /// Working directory for the spawned process.
    pub cwd: Option<PathBuf>,
    /// TCP port requested from the CLI in socket mode; `0` lets it choose.
    pub port: u16,
    /// Speak the protocol over the child's stdin/stdout instead of a socket.
    #[serde(default = "default_true")]
    pub use_stdio: bool,
    /// Address of an already-running server; no process is spawned.
    pub cli_url: Option<String>,
    /// Log level forwarded to the CLI.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Connect lazily on the first operation instead of requiring `start()`.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Full replacement environment for the child, when set.
    pub environment: Option<HashMap<String, String>>,
    /// GitHub token forwarded to the CLI through its environment.
    pub github_token: Option<String>,
    /// Whether the CLI may fall back to the logged-in user's credentials.
    pub use_logged_in_user: Option<bool>,
    /// Deadline for the readiness signal in socket mode.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// Bound on the handshake ping round trip.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on the remote `session.destroy` call made by `Session::close`.
    #[serde(default = "default_destroy_timeout")]
    pub session_destroy_timeout_secs: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cli_path: default_cli_path(),
            cli_args: Vec::new(),
            cwd: None,
            port: 0,
            use_stdio: true,
            cli_url: None,
            log_level: default_log_level(),
            auto_start: true,
            environment: None,
            github_token: None,
            use_logged_in_user: None,
            startup_timeout_secs: default_startup_timeout(),
            request_timeout_secs: default_request_timeout(),
            session_destroy_timeout_secs: default_destroy_timeout(),
        }
    }
}

impl ClientOptions {
    /// Load and validate options from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ClientError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse options from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let options: Self = toml::from_str(raw)?;
        options.validate()?;
        Ok(options)
    }

    /// Options for connecting to an already-running server at `url`.
    #[must_use]
    pub fn external(url: impl Into<String>) -> Self {
        Self {
            cli_url: Some(url.into()),
            use_stdio: false,
            ..Self::default()
        }
    }

    /// Check mutually exclusive settings.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` when `cli_url` is combined with process
    /// launch settings or with authentication settings.
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.cli_url {
            if self.use_stdio {
                return Err(ClientError::Config(
                    "cli_url is mutually exclusive with use_stdio".into(),
                ));
            }
            if self.cli_path != default_cli_path() {
                return Err(ClientError::Config(
                    "cli_url is mutually exclusive with cli_path".into(),
                ));
            }
            if self.github_token.is_some() || self.use_logged_in_user.is_some() {
                return Err(ClientError::Config(
                    "github_token and use_logged_in_user cannot be used with cli_url; the external \
                     server manages its own authentication"
                        .into(),
                ));
            }
            parse_cli_url(url)?;
        }

        if self.cli_path.trim().is_empty() {
            return Err(ClientError::Config("cli_path must not be empty".into()));
        }

        if self.startup_timeout_secs == 0 {
            return Err(ClientError::Config(
                "startup_timeout_secs must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Whether the client connects to an external server.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.cli_url.is_some()
    }

    /// Whether the CLI may use the logged-in user's credentials.
    ///
    /// Defaults to `false` when an explicit token is supplied.
    #[must_use]
    pub fn resolved_use_logged_in_user(&self) -> bool {
        self.use_logged_in_user
            .unwrap_or_else(|| self.github_token.as_deref().is_none_or(str::is_empty))
    }

    /// Readiness deadline as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Handshake bound as a [`Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Session destroy bound as a [`Duration`].
    #[must_use]
    pub fn session_destroy_timeout(&self) -> Duration {
        Duration::from_secs(self.session_destroy_timeout_secs)
    }

    /// Fill `github_token` from the OS keychain or environment when unset.
    ///
    /// Tries the [`KEYRING_SERVICE`] keychain entry first, then each of
    /// [`TOKEN_ENV_VARS`]. A missing token is not an error: the CLI then
    /// relies on the logged-in user. External-server options are left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if self.github_token.is_some() || self.is_external() {
            return Ok(());
        }
        self.github_token = load_token().await?;
        Ok(())
    }
}

/// Parse a `cli_url` into a host and port.
///
/// Accepts a bare port (`"8080"`, host defaults to `localhost`),
/// `"host:port"`, and either form prefixed with `http://` or `https://`.
///
/// # Errors
///
/// Returns `ClientError::Config` for any other shape or an invalid port.
pub fn parse_cli_url(url: &str) -> Result<(String, u16)> {
    let clean = url
        .trim()
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');

    let (host, port) = match clean.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None if clean.parse::<u16>().is_ok() => ("", clean),
        None => {
            return Err(ClientError::Config(format!(
                "invalid cli_url '{url}': expected host:port, http://host:port, or port"
            )))
        }
    };

    let port = port
        .parse::<u16>()
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| ClientError::Config(format!("invalid port in cli_url '{url}'")))?;

    let host = if host.is_empty() { "localhost" } else { host };
    Ok((host.to_owned(), port))
}

/// Look up a GitHub token in the keychain, then the environment.
async fn load_token() -> Result<Option<String>> {
    let keychain_result = tokio::task::spawn_blocking(|| {
        keyring::Entry::new(KEYRING_SERVICE, "github_token").and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| ClientError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => warn!("keychain github_token entry is empty, trying env vars"),
        Err(err) => debug!(?err, "keychain lookup failed, trying env vars"),
    }

    Ok(TOKEN_ENV_VARS
        .iter()
        .find_map(|key| env::var(key).ok().filter(|v| !v.is_empty())))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

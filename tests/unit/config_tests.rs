//! Unit tests for `ClientOptions` parsing, validation and credential loading.

use std::io::Write;

use serial_test::serial;

use copilot_client::config::{ClientOptions, TOKEN_ENV_VARS};
use copilot_client::ClientError;

// ── Parsing ─────────────────────────────────────────────────────────────────

/// An empty document yields the documented defaults.
#[test]
fn empty_toml_uses_defaults() {
    let options = ClientOptions::from_toml_str("").expect("empty config is valid");

    assert_eq!(options, ClientOptions::default());
    assert_eq!(options.cli_path, "copilot");
    assert!(options.use_stdio);
    assert!(options.auto_start);
    assert_eq!(options.log_level, "info");
    assert_eq!(options.startup_timeout().as_secs(), 30);
    assert_eq!(options.session_destroy_timeout().as_secs(), 5);
}

/// Every field can be set from TOML.
#[test]
fn full_toml_round_trips_into_fields() {
    let raw = r#"
cli_path = "/opt/copilot/index.js"
cli_args = ["--experimental"]
port = 4100
use_stdio = false
log_level = "debug"
auto_start = false
github_token = "ghp_test"
startup_timeout_secs = 10
request_timeout_secs = 3

[environment]
PATH = "/usr/bin"
"#;
    let options = ClientOptions::from_toml_str(raw).expect("valid config");

    assert_eq!(options.cli_args, ["--experimental"]);
    assert_eq!(options.port, 4100);
    assert!(!options.use_stdio);
    assert!(!options.auto_start);
    assert_eq!(options.github_token.as_deref(), Some("ghp_test"));
    assert_eq!(
        options.environment.as_ref().and_then(|env| env.get("PATH")).map(String::as_str),
        Some("/usr/bin")
    );
    assert_eq!(options.request_timeout().as_secs(), 3);
}

/// Options load from a file on disk.
#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "log_level = \"warning\"").expect("write config");

    let options = ClientOptions::load_from_path(file.path()).expect("load");

    assert_eq!(options.log_level, "warning");
}

/// A missing file is a configuration error.
#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = ClientOptions::load_from_path(dir.path().join("absent.toml")).expect_err("must fail");

    assert!(matches!(err, ClientError::Config(_)), "got {err:?}");
}

/// Invalid TOML is a configuration error.
#[test]
fn invalid_toml_is_config_error() {
    let err = ClientOptions::from_toml_str("port = \"not a number\"").expect_err("must fail");
    assert!(matches!(err, ClientError::Config(_)), "got {err:?}");
}

// ── Validation ──────────────────────────────────────────────────────────────

/// `cli_url` cannot be combined with stdio transport.
#[test]
fn cli_url_with_stdio_is_rejected() {
    let options = ClientOptions {
        cli_url: Some("localhost:8080".into()),
        use_stdio: true,
        ..ClientOptions::default()
    };
    assert!(options.validate().is_err());
}

/// `cli_url` cannot be combined with a custom CLI path.
#[test]
fn cli_url_with_cli_path_is_rejected() {
    let options = ClientOptions {
        cli_path: "/usr/local/bin/copilot".into(),
        ..ClientOptions::external("8080")
    };
    assert!(options.validate().is_err());
}

/// `cli_url` cannot be combined with authentication settings.
#[test]
fn cli_url_with_auth_is_rejected() {
    let with_token = ClientOptions {
        github_token: Some("ghp_x".into()),
        ..ClientOptions::external("8080")
    };
    let with_login = ClientOptions {
        use_logged_in_user: Some(true),
        ..ClientOptions::external("8080")
    };

    assert!(with_token.validate().is_err());
    assert!(with_login.validate().is_err());
}

/// A well-formed external configuration validates.
#[test]
fn external_options_validate() {
    let options = ClientOptions::external("https://127.0.0.1:9000");
    assert!(options.validate().is_ok());
    assert!(options.is_external());
}

/// A malformed URL fails validation.
#[test]
fn malformed_cli_url_is_rejected() {
    assert!(ClientOptions::external("no-port-here").validate().is_err());
}

/// An explicit token turns off logged-in-user fallback unless overridden.
#[test]
fn token_disables_logged_in_user_by_default() {
    let mut options = ClientOptions {
        github_token: Some("ghp_x".into()),
        ..ClientOptions::default()
    };
    assert!(!options.resolved_use_logged_in_user());

    options.use_logged_in_user = Some(true);
    assert!(options.resolved_use_logged_in_user());

    assert!(ClientOptions::default().resolved_use_logged_in_user());
}

// ── Credentials ─────────────────────────────────────────────────────────────

fn clear_token_env() {
    for key in TOKEN_ENV_VARS {
        std::env::remove_var(key);
    }
}

/// A configured token is never replaced.
#[tokio::test]
#[serial]
async fn configured_token_is_kept() {
    clear_token_env();
    std::env::set_var("GH_TOKEN", "from-env");
    let mut options = ClientOptions {
        github_token: Some("configured".into()),
        ..ClientOptions::default()
    };

    options.load_credentials().await.expect("load");

    assert_eq!(options.github_token.as_deref(), Some("configured"));
    clear_token_env();
}

/// External-server options never pick up a token.
#[tokio::test]
#[serial]
async fn external_options_skip_credentials() {
    clear_token_env();
    std::env::set_var("GITHUB_TOKEN", "from-env");
    let mut options = ClientOptions::external("8080");

    options.load_credentials().await.expect("load");

    assert_eq!(options.github_token, None);
    clear_token_env();
}

#![forbid(unsafe_code)]

//! `copilot-probe` — connectivity check for a Copilot CLI server.
//!
//! Starts (or connects to) the CLI, performs the handshake, prints status,
//! auth state and the model list, then shuts everything down.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use copilot_client::{ClientError, ClientOptions, CopilotClient, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "copilot-probe", about = "Copilot CLI connectivity probe", version, long_about = None)]
struct Cli {
    /// Path to a TOML file with client options.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Connect to an already running server instead of spawning one.
    #[arg(long)]
    cli_url: Option<String>,

    /// Path of the CLI executable.
    #[arg(long)]
    cli_path: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ClientError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => ClientOptions::load_from_path(path)?,
        None => ClientOptions::default(),
    };
    if let Some(url) = args.cli_url {
        options = ClientOptions {
            environment: options.environment,
            request_timeout_secs: options.request_timeout_secs,
            ..ClientOptions::external(url)
        };
    }
    if let Some(path) = args.cli_path {
        options.cli_path = path;
    }
    if !options.is_external() {
        options.load_credentials().await?;
    }

    let client = CopilotClient::new(options)?;
    client.start().await?;
    info!(state = ?client.state(), "connected");

    let outcome = report(&client).await;

    for err in client.stop().await {
        warn!(error = %err, "shutdown error");
    }
    outcome
}

async fn report(client: &CopilotClient) -> Result<()> {
    let status = client.get_status().await?;
    println!(
        "cli version: {} (protocol {})",
        status.version.as_deref().unwrap_or("unknown"),
        status.protocol_version.map_or_else(|| "?".to_owned(), |v| v.to_string())
    );

    let auth = client.get_auth_status().await?;
    println!(
        "authenticated: {}{}",
        auth.is_authenticated,
        auth.login.map(|login| format!(" as {login}")).unwrap_or_default()
    );

    for model in client.list_models().await? {
        println!("model: {} ({})", model.id, model.name);
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_writer(std::io::stderr).with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

#![forbid(unsafe_code)]

//! `robot-session`: pick-and-place demonstration client.
//!
//! Connects to a robot control server, builds a small scene, streams the
//! robot position, and runs a scripted sequence of actions.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use robot_session::demo::{self, DemoOptions};
use robot_session::{ClientError, Result, Session, SessionConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "robot-session", about = "Robot control session demo", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the server address.
    #[arg(long)]
    address: Option<String>,

    /// Override the server port.
    #[arg(long)]
    port: Option<u16>,

    /// Position monitor period in milliseconds.
    #[arg(long, default_value_t = 100)]
    monitor_interval_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("robot-session starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ClientError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => SessionConfig::load_from_path(path)?,
        None => SessionConfig::default(),
    };
    if let Some(address) = args.address {
        config.endpoint.address = address;
    }
    if let Some(port) = args.port {
        config.endpoint.port = port;
    }
    config.validate()?;
    info!(endpoint = %config.endpoint.authority(), "configuration loaded");

    if args.monitor_interval_ms == 0 {
        return Err(ClientError::Config(
            "monitor interval must be greater than zero".into(),
        ));
    }
    let options = DemoOptions {
        monitor_interval: Duration::from_millis(args.monitor_interval_ms),
        ..DemoOptions::default()
    };

    // ── Connect and run ─────────────────────────────────
    let session = Session::connect(config).await?;

    let outcome = tokio::select! {
        result = demo::run(&session, options) => result,
        () = shutdown_signal() => {
            warn!("shutdown signal received, stopping demo");
            Ok(())
        }
    };

    if let Err(ref err) = outcome {
        error!(%err, "demo failed");
    }

    // ── Teardown ────────────────────────────────────────
    session.close().await?;
    info!("robot-session shut down");

    outcome
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

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

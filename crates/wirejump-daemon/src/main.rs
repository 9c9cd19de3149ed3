//! wirejumpd - WireJump connection manager daemon

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wirejump_daemon::{server, DaemonConfig, Environment, Layout, ProviderCatalog, WgQuick};

/// WireJump connection manager daemon
#[derive(Parser, Debug)]
#[command(name = "wirejumpd")]
#[command(about = "WireJump connection manager daemon", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ", env!("WIREJUMP_BUILD_COMMIT"),
    "\nBuilt: ", env!("WIREJUMP_BUILD_DATE")
))]
struct Cli {
    /// Daemon config file
    #[arg(short, long, env = "WIREJUMP_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "WIREJUMP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = DaemonConfig::load(&cli.config).await?;
    let env = Environment::new(Arc::new(WgQuick::new()), Layout::new(&config.base_path));

    let shutdown = CancellationToken::new();
    watch_signals(shutdown.clone())?;

    server::run(config, env, ProviderCatalog::builtin(), shutdown).await
}

/// Cancel `shutdown` on SIGINT, SIGTERM or SIGQUIT
fn watch_signals(shutdown: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut quit = signal(SignalKind::quit()).context("Failed to install SIGQUIT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = quit.recv() => info!("Received SIGQUIT"),
        }
        shutdown.cancel();
    });

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

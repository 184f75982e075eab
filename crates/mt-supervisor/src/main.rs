//! mesh-tunnel
//!
//! Reads a JSON mapping file, connects to the relay server and keeps one
//! tunnel per mapping alive until the connection drops, a tunnel fails, or
//! the process is asked to stop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mt_core::config;
use mt_supervisor::transport::{RelayWorkerFactory, WsControlChannel};
use mt_supervisor::{ShutdownCoordinator, TunnelSupervisor};

#[derive(Parser)]
#[command(name = "mesh-tunnel")]
#[command(about = "mesh-tunnel - keeps relay port mappings alive")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Parse configuration...");
    let config = config::load_config(&args.config)
        .with_context(|| format!("Configuration error in {:?}", args.config))?;
    tracing::info!(
        "Loaded {} mappings for {}",
        config.mappings.len(),
        config.server.username
    );

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("TLS crypto provider already installed");
    }

    let shutdown = ShutdownCoordinator::new();
    let signals = shutdown
        .install()
        .context("Failed to install signal handlers")?;

    let channel = Arc::new(WsControlChannel::new());
    let factory = RelayWorkerFactory::new(config.server.credentials());
    let mut supervisor =
        TunnelSupervisor::new(Arc::new(config), channel, factory, shutdown.token());

    let outcome = supervisor.run().await;

    shutdown.finish(signals).await;

    let trigger = outcome.context("Server connection failed")?;
    tracing::info!("Shutdown complete ({})", trigger);
    Ok(())
}

//! Echo Server Entry Point
//!
//! Accepts WebSocket connections and echoes every message back to its sender.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use echo_relay::cli::args::ServerArgs;
use echo_relay::cli::logging::init_logging;
use echo_relay::server::listener::Listener;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let verbose = args.verbose;
    let config = args.into_config()?;

    init_logging(&config.logging, verbose)?;
    info!(
        port = config.port,
        max_connections = config.max_connections,
        allowed_origins = ?config.allowed_origins,
        "Configuration loaded"
    );

    let listener = Listener::bind(&config)
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;

    listener.run_until(shutdown_signal()).await;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT");
}

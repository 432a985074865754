//! Echo Client Entry Point
//!
//! Keeps a connection to the echo server open and sends a random number on
//! every interval, logging whatever comes back.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use echo_relay::cli::args::ClientArgs;
use echo_relay::cli::logging::init_logging;
use echo_relay::{ReconnectingClient, WsConnector};

#[tokio::main]
async fn main() -> Result<()> {
    let args = ClientArgs::parse();
    let verbose = args.verbose;
    let config = args.into_config()?;

    init_logging(&config.logging, verbose)?;
    info!(
        url = %config.url,
        reconnect_interval_ms = config.reconnect_interval_ms,
        send_interval_ms = config.send_interval_ms,
        "Configuration loaded"
    );

    let connector = WsConnector::from_config(&config);
    let mut client = ReconnectingClient::new(&config, connector);
    client.run_until(shutdown_signal()).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received SIGINT. Cleaning up...");
}

//! Command-line arguments
//!
//! Flags for both binaries. Each flag can also be set through the environment
//! variable named next to it, and overrides the value from the config file.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::cli::config::{ClientConfig, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "echo-server")]
#[command(author, version, about = "Echo Relay server - echoes WebSocket messages back to their sender")]
pub struct ServerArgs {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Comma-separated list of allowed origins
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Option<Vec<String>>,

    /// Maximum number of concurrent connections
    #[arg(long, env = "MAX_CONNECTIONS")]
    pub max_connections: Option<usize>,
}

impl ServerArgs {
    /// Load the config file (if any), apply overrides and validate
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(origins) = self.allowed_origins {
            config.allowed_origins = origins;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }

        config.validate().context("Invalid server configuration")?;
        Ok(config)
    }
}

#[derive(Debug, Parser)]
#[command(name = "echo-client")]
#[command(author, version, about = "Echo Relay client - keeps a connection open and sends a number every interval")]
pub struct ClientArgs {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// WebSocket URL of the echo server
    #[arg(long, env = "WS_URL")]
    pub url: Option<String>,

    /// Reconnect interval in milliseconds
    #[arg(long, env = "RECONNECT_INTERVAL")]
    pub reconnect_interval: Option<u64>,

    /// Interval between outbound messages in milliseconds
    #[arg(long, env = "MESSAGE_INTERVAL")]
    pub message_interval: Option<u64>,
}

impl ClientArgs {
    /// Load the config file (if any), apply overrides and validate
    pub fn into_config(self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };

        if let Some(url) = self.url {
            config.url = url;
        }
        if let Some(ms) = self.reconnect_interval {
            config.reconnect_interval_ms = ms;
        }
        if let Some(ms) = self.message_interval {
            config.send_interval_ms = ms;
        }

        config.validate().context("Invalid client configuration")?;
        Ok(config)
    }
}

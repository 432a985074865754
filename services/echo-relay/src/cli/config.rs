//! Configuration module
//!
//! Handles loading and validating server and client configuration from TOML
//! files. Every field has a default so an empty file (or no file) is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::connection::protocol::{DEFAULT_ORIGIN, MAX_FRAME_SIZE, MAX_MESSAGE_SIZE};
use crate::error::RelayError;

/// Echo server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed to open a connection (exact, case-sensitive match)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Maximum number of concurrent sessions
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum size of a single frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum size of a reassembled message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Keep-alive ping interval in seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Echo client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL of the echo server
    #[serde(default = "default_url")]
    pub url: String,

    /// Origin header declared during the handshake
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Delay before a reconnect attempt in milliseconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,

    /// Delay between outbound messages in milliseconds
    #[serde(default = "default_send_interval")]
    pub send_interval_ms: u64,

    /// Upper bound on a single connection attempt in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_allowed_origins() -> Vec<String> {
    vec![DEFAULT_ORIGIN.to_string()]
}

fn default_max_connections() -> usize {
    100
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_url() -> String {
    "ws://localhost:8080/".to_string()
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_send_interval() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            max_message_size: default_max_message_size(),
            keepalive_interval_secs: default_keepalive_interval(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            origin: default_origin(),
            reconnect_interval_ms: default_reconnect_interval(),
            send_interval_ms: default_send_interval(),
            connect_timeout_secs: default_connect_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_toml(path.as_ref())
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        if self.port == 0 {
            return Err(RelayError::Config("port must be greater than 0".to_string()));
        }
        if self.max_frame_size == 0 || self.max_message_size == 0 {
            return Err(RelayError::Config(
                "frame and message size limits must be greater than 0".to_string(),
            ));
        }
        if self.keepalive_interval_secs == 0 {
            return Err(RelayError::Config(
                "keepalive_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Allowed origins as a set, with surrounding whitespace and empty
    /// entries removed
    pub fn origin_set(&self) -> HashSet<String> {
        self.allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_toml(path.as_ref())
    }

    /// Check values that serde cannot reject on its own
    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(RelayError::Config(format!(
                "url must use the ws:// or wss:// scheme: {}",
                self.url
            )));
        }
        if self.reconnect_interval_ms == 0 || self.send_interval_ms == 0 {
            return Err(RelayError::Config(
                "reconnect and send intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.max_message_size, 1_048_576);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(30));
        assert!(config.origin_set().contains("http://localhost:3000"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_server_config() {
        let toml_content = r#"
            port = 9000
            allowed_origins = ["https://a.example", " https://b.example ", ""]
        "#;

        let config: ServerConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.logging.level, "info");

        let origins = config.origin_set();
        assert_eq!(origins.len(), 2);
        assert!(origins.contains("https://b.example"));
    }

    #[test]
    fn test_server_validation() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_default_client_config() {
        let config = ClientConfig::default();
        assert_eq!(config.url, "ws://localhost:8080/");
        assert_eq!(config.origin, "http://localhost:3000");
        assert_eq!(config.reconnect_interval(), Duration::from_secs(5));
        assert_eq!(config.send_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_rejects_http_url() {
        let config = ClientConfig {
            url: "http://localhost:8080/".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = ServerConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

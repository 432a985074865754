//! Error types
//!
//! Errors raised by the relay core. Policy rejections are kept separate from
//! transport failures because they are an expected outcome of the handshake
//! and map directly to an HTTP status.

use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, http::StatusCode};

/// Result alias used across the relay core
pub type Result<T> = std::result::Result<T, RelayError>;

/// Reasons the accept policy refuses an upgrade request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyRejection {
    /// The request's `Origin` header is missing or not in the allow-list
    #[error("origin {origin:?} is not allowed")]
    OriginNotAllowed { origin: Option<String> },

    /// The live-session count has reached the configured limit
    #[error("server at capacity ({limit} connections)")]
    CapacityExceeded { limit: usize },
}

impl PolicyRejection {
    /// HTTP status returned to the client in place of the upgrade
    pub fn status(&self) -> StatusCode {
        match self {
            PolicyRejection::OriginNotAllowed { .. } => StatusCode::FORBIDDEN,
            PolicyRejection::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Errors produced by the relay server and client
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("connection rejected: {0}")]
    Rejected(#[from] PolicyRejection),

    #[error("sub-protocol {0:?} was not requested by the client")]
    ProtocolNotRequested(&'static str),

    #[error("handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

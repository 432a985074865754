//! Echo Relay Library
//!
//! Core of a minimal WebSocket echo relay: a server that accepts connections
//! under an origin and capacity policy and echoes every message back to its
//! sender, and a client that keeps one connection open, reconnecting when it
//! drops, while sending a random number on a fixed cadence.

pub mod cli;
pub mod client;
pub mod connection;
pub mod error;
pub mod server;

// Re-exports for convenience
pub use cli::config::{ClientConfig, LoggingConfig, ServerConfig};
pub use client::connector::{Connection, Connector, WsConnector};
pub use client::reconnect::ReconnectingClient;
pub use client::state::{ClientState, ClientStateManager};
pub use connection::protocol::{CloseInfo, Message, SessionEvent, SUB_PROTOCOL};
pub use error::{PolicyRejection, RelayError, Result};
pub use server::listener::{AcceptPolicy, Listener};
pub use server::registry::{ConnectionRegistry, SessionPermit};
pub use server::session::{ConnectionSession, SessionState};

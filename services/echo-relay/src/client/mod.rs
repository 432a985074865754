//! Client module
//!
//! The reconnecting echo client: its state machine, the transport seam and
//! the client itself.

pub mod connector;
pub mod reconnect;
pub mod state;

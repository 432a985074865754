//! Server module
//!
//! The echo server: listener and accept policy, the live-session registry and
//! the per-connection session.

pub mod listener;
pub mod registry;
pub mod session;

//! Connection module
//!
//! Pieces shared by both ends of the relay: the message protocol, the
//! outbound frame sink and the owned timers.

pub mod protocol;
pub mod sink;
pub mod timer;

//! CLI module
//!
//! Configuration, command-line flags and logging setup used by the
//! `echo-server` and `echo-client` binaries.

pub mod args;
pub mod config;
pub mod logging;

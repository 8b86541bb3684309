//! vslab daemon library.
//!
//! Exposes the daemon's modules for integration testing.
//! In production, `vslab-daemon` is used as a binary (main.rs).

pub mod cli;
pub mod control;
pub mod daemon;
pub mod health;
pub mod logging;
pub mod metrics_server;

//! Command handlers -- one module per subcommand

pub mod config;
pub mod project;
pub mod status;

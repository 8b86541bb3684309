//! vslab CLI library
//!
//! The binary in `main.rs` is a thin wrapper; the handlers live here so
//! integration tests can drive them against a fake daemon.

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod output;

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use vslab_core::config::VslabConfig;
use vslab_core::error::{ConfigError, VslabError};

use cli::{Cli, Commands};
use error::CliError;
use output::OutputWriter;

/// Where to find a running daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonLocation {
    /// Control socket path.
    pub socket_path: PathBuf,
    /// PID file path.
    pub pid_file: String,
}

/// Resolve the daemon location.
///
/// `--socket` wins over the configuration. A missing configuration file
/// falls back to defaults with env overrides applied; a broken one is an
/// error.
pub async fn resolve_location(
    config_path: &Path,
    socket_override: Option<&Path>,
) -> Result<DaemonLocation, CliError> {
    let mut config = match VslabConfig::from_file(config_path).await {
        Ok(config) => config,
        Err(VslabError::Config(ConfigError::FileNotFound { .. })) => {
            debug!(path = %config_path.display(), "config file not found, using defaults");
            VslabConfig::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.apply_env_overrides();

    let socket_path = socket_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.control.socket_path));

    Ok(DaemonLocation {
        socket_path,
        pid_file: config.general.pid_file,
    })
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let timeout = Duration::from_secs(cli.timeout_secs);

    match cli.command {
        Commands::Project(args) => {
            let location = resolve_location(&cli.config, cli.socket.as_deref()).await?;
            commands::project::execute(args, &location.socket_path, timeout, &writer).await
        }
        Commands::Status(args) => {
            let location = resolve_location(&cli.config, cli.socket.as_deref()).await?;
            commands::status::execute(
                args,
                &location.pid_file,
                &location.socket_path,
                timeout,
                &writer,
            )
            .await
        }
        Commands::Config(args) => commands::config::execute(args, &cli.config, &writer).await,
    }
}

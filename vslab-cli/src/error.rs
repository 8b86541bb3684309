//! CLI-specific error types and exit code mapping

use vslab_core::error::VslabError;

/// CLI-specific error type.
///
/// Each variant carries enough context for a user-friendly message.
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// The daemon rejected or failed a request.
    #[error("{kind}: {message}")]
    Command {
        /// Error kind reported by the daemon (or `cli` for local failures).
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// The request failed and left engine state and records out of step.
    #[error("inconsistent state ({kind}): {message}")]
    Inconsistent {
        /// Error kind reported by the daemon.
        kind: String,
        /// Human-readable message.
        message: String,
    },

    /// Cannot connect to the daemon's control socket.
    #[error("daemon not reachable: {0}")]
    DaemonUnavailable(String),

    /// The daemon answered with something this client does not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, socket write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from vslab-core.
    #[error("{0}")]
    Core(#[from] VslabError),
}

impl CliError {
    /// Build a local command error.
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            kind: "cli".to_owned(),
            message: message.into(),
        }
    }

    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                  |
    /// |------|------------------------------------------|
    /// | 0    | Success                                  |
    /// | 1    | General / command error                  |
    /// | 2    | Configuration error                      |
    /// | 3    | Daemon unreachable                       |
    /// | 4    | Request left inconsistent state          |
    /// | 10   | IO error                                 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(VslabError::Config(_)) => 2,
            Self::DaemonUnavailable(_) => 3,
            Self::Inconsistent { .. } => 4,
            Self::Io(_) => 10,
            Self::Command { .. } | Self::Protocol(_) | Self::JsonSerialize(_) | Self::Core(_) => 1,
        }
    }
}

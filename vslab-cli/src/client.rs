//! Control socket client
//!
//! Sends one newline-delimited JSON request and waits for its single
//! response line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use vslab_core::protocol::{ControlRequest, ControlResponse, encode_line};

use crate::error::CliError;

/// Client connection to the daemon's control socket.
pub struct ControlClient {
    socket_path: PathBuf,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ControlClient {
    /// Connect to the control socket.
    ///
    /// # Errors
    ///
    /// `CliError::DaemonUnavailable` when the socket is missing or refuses
    /// the connection.
    pub async fn connect(socket_path: &Path, timeout: Duration) -> Result<Self, CliError> {
        let stream = UnixStream::connect(socket_path).await.map_err(|e| {
            CliError::DaemonUnavailable(format!("{}: {}", socket_path.display(), e))
        })?;
        let (read_half, writer) = stream.into_split();
        debug!(socket = %socket_path.display(), "connected to control socket");
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            reader: BufReader::new(read_half),
            writer,
            timeout,
        })
    }

    /// Send one request and return the daemon's response.
    pub async fn request(&mut self, request: &ControlRequest) -> Result<ControlResponse, CliError> {
        let line = encode_line(request)?;
        self.writer.write_all(line.as_bytes()).await?;

        let mut response = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut response))
            .await
            .map_err(|_| {
                CliError::DaemonUnavailable(format!(
                    "no response from {} within {}s",
                    self.socket_path.display(),
                    self.timeout.as_secs()
                ))
            })??;
        if read == 0 {
            return Err(CliError::DaemonUnavailable(format!(
                "{} closed the connection",
                self.socket_path.display()
            )));
        }

        serde_json::from_str(response.trim_end())
            .map_err(|e| CliError::Protocol(format!("unreadable response: {e}")))
    }

    /// Send a request and turn daemon-side errors into [`CliError`].
    pub async fn call(&mut self, request: &ControlRequest) -> Result<ControlResponse, CliError> {
        match self.request(request).await? {
            ControlResponse::Error {
                kind,
                message,
                inconsistent,
            } => {
                if inconsistent {
                    Err(CliError::Inconsistent { kind, message })
                } else {
                    Err(CliError::Command { kind, message })
                }
            }
            response => Ok(response),
        }
    }
}

//! Unix control socket server.
//!
//! Clients (the web layer, `vslab-cli`) send one JSON request per line and
//! receive exactly one JSON response line per request. Connections are
//! bounded by a semaphore; new connections over the limit are dropped.
//!
//! # Line Handling
//!
//! - Lines longer than `max_request_bytes` are discarded up to the next
//!   newline and answered with a `request_too_large` error.
//! - Lines that are not a valid request get a `bad_request` error.
//! - Blank lines are ignored.
//!
//! In every case the connection stays open for the next request.
//!
//! # Shutdown
//!
//! On cancellation the server stops accepting connections and stops reading
//! new requests. Requests already being executed run to completion and are
//! answered; the accept task finishes once they drain or the drain timeout
//! elapses.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use vslab_core::config::ControlConfig;
use vslab_core::metrics as m;
use vslab_core::protocol::{
    ControlRequest, ControlResponse, ERROR_KIND_BAD_REQUEST, ERROR_KIND_FORBIDDEN,
    ERROR_KIND_REQUEST_TOO_LARGE, encode_line,
};
use vslab_orchestrator::{
    ContainerOrchestrator, EngineClientFactory, OrchestratorError, ProjectStore,
};

use crate::health::DaemonHealth;

/// Result label for successful requests.
const RESULT_OK: &str = "ok";
/// Result label for failed requests.
const RESULT_ERROR: &str = "error";

/// How long shutdown waits for in-flight requests to finish.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// One framed read from a connection.
#[derive(Debug, PartialEq, Eq)]
enum RequestLine {
    /// A complete line is in the buffer (newline stripped).
    Line,
    /// The line exceeded the limit and was discarded.
    TooLarge,
    /// The peer closed the connection.
    Eof,
}

/// Control socket server.
pub struct ControlServer<F: EngineClientFactory, S: ProjectStore> {
    orchestrator: Arc<ContainerOrchestrator<F, S>>,
    socket_path: PathBuf,
    max_connections: usize,
    max_request_bytes: usize,
    ping_timeout: Duration,
    drain_timeout: Duration,
    started_at: Instant,
}

impl<F: EngineClientFactory, S: ProjectStore> ControlServer<F, S> {
    /// Create a server from the `[control]` configuration section.
    pub fn new(orchestrator: Arc<ContainerOrchestrator<F, S>>, config: &ControlConfig) -> Self {
        Self {
            orchestrator,
            socket_path: PathBuf::from(&config.socket_path),
            max_connections: config.max_connections,
            max_request_bytes: config.max_request_bytes,
            ping_timeout: vslab_orchestrator::service::DEFAULT_PING_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            started_at: Instant::now(),
        }
    }

    /// Set the per-host ping timeout used by `health` requests.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set how long shutdown waits for in-flight requests.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Use an externally recorded start time for uptime reporting.
    pub fn with_start_time(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Socket path this server binds.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket and spawn the accept loop.
    ///
    /// A stale socket file from a previous run is removed first. The socket
    /// is restricted to the daemon's user (0o600). The returned task ends
    /// after cancellation once in-flight requests have drained.
    pub fn spawn(self, cancel: CancellationToken) -> Result<tokio::task::JoinHandle<()>> {
        let listener = bind_socket(&self.socket_path)?;
        info!(
            socket = %self.socket_path.display(),
            max_connections = self.max_connections,
            "control socket listening"
        );
        Ok(tokio::spawn(self.run(listener, cancel)))
    }

    async fn run(self, listener: UnixListener, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let tracker = TaskTracker::new();
        let shared = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _addr)) => stream,
                        Err(e) => {
                            warn!(error = %e, "control socket accept failed");
                            continue;
                        }
                    };

                    let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                        Ok(p) => p,
                        Err(_) => {
                            warn!(
                                max_connections = shared.max_connections,
                                "max control connections reached, rejecting connection"
                            );
                            continue;
                        }
                    };

                    let server = Arc::clone(&shared);
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        metrics::gauge!(m::CONTROL_ACTIVE_CONNECTIONS).increment(1.0);
                        if let Err(e) = server.handle_connection(stream, cancel).await {
                            debug!(error = %e, "control connection ended with error");
                        }
                        metrics::gauge!(m::CONTROL_ACTIVE_CONNECTIONS).decrement(1.0);
                        drop(permit);
                    });
                }
                _ = cancel.cancelled() => {
                    info!("control socket received shutdown signal");
                    break;
                }
            }
        }
        drop(listener);

        tracker.close();
        let in_flight = tracker.len();
        if in_flight > 0 {
            info!(connections = in_flight, "draining control connections");
        }
        if tokio::time::timeout(shared.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                connections = tracker.len(),
                timeout_secs = shared.drain_timeout.as_secs(),
                "control connections still busy after drain timeout"
            );
        }
    }

    async fn handle_connection(
        &self,
        stream: UnixStream,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let framed = tokio::select! {
                result = read_request_line(&mut reader, &mut buf, self.max_request_bytes) => result?,
                _ = cancel.cancelled() => break,
            };

            let response = match framed {
                RequestLine::Eof => break,
                RequestLine::TooLarge => {
                    warn!(
                        max_request_bytes = self.max_request_bytes,
                        "oversized control request discarded"
                    );
                    record_request("oversized", RESULT_ERROR);
                    ControlResponse::error(
                        ERROR_KIND_REQUEST_TOO_LARGE,
                        format!("request exceeds {} bytes", self.max_request_bytes),
                        false,
                    )
                }
                RequestLine::Line => {
                    if buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<ControlRequest>(&buf) {
                        Ok(request) => self.handle_request(request).await,
                        Err(e) => {
                            debug!(error = %e, "malformed control request");
                            record_request("malformed", RESULT_ERROR);
                            ControlResponse::error(
                                ERROR_KIND_BAD_REQUEST,
                                format!("malformed request: {e}"),
                                false,
                            )
                        }
                    }
                }
            };

            let line = encode_line(&response).map_err(std::io::Error::other)?;
            write_half.write_all(line.as_bytes()).await?;
        }

        Ok(())
    }

    /// Execute one request against the orchestrator.
    pub async fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        let op = request.op_name();
        let response = dispatch(
            &self.orchestrator,
            request,
            self.ping_timeout,
            self.started_at,
        )
        .await;
        let result = if response.is_error() {
            RESULT_ERROR
        } else {
            RESULT_OK
        };
        record_request(op, result);
        response
    }
}

/// Route a request to the matching orchestrator operation.
///
/// When a targeted request carries an `owner_id`, it must match the
/// record's owner before anything else happens.
pub async fn dispatch<F: EngineClientFactory, S: ProjectStore>(
    orchestrator: &ContainerOrchestrator<F, S>,
    request: ControlRequest,
    ping_timeout: Duration,
    started_at: Instant,
) -> ControlResponse {
    if let Some((project_id, Some(owner_id))) = request.target() {
        match orchestrator.get(project_id).await {
            Ok(project) if project.owner_id != owner_id => {
                warn!(
                    project_id = %project_id,
                    owner_id = %owner_id,
                    op = request.op_name(),
                    "control request rejected: owner mismatch"
                );
                return ControlResponse::error(
                    ERROR_KIND_FORBIDDEN,
                    format!("project {project_id} is not owned by {owner_id}"),
                    false,
                );
            }
            Ok(_) => {}
            Err(e) => return error_response(&e),
        }
    }

    let result = match request {
        ControlRequest::Reserve {
            owner_id,
            name,
            image_kind,
        } => orchestrator
            .reserve(owner_id, name, image_kind)
            .await
            .map(|project| ControlResponse::Project { project }),
        ControlRequest::Start { project_id, .. } => {
            orchestrator
                .start(project_id)
                .await
                .map(|outcome| ControlResponse::Started {
                    already_running: outcome.is_already_running(),
                    project: outcome.into_project(),
                })
        }
        ControlRequest::Stop { project_id, .. } => {
            orchestrator
                .stop(project_id)
                .await
                .map(|outcome| ControlResponse::Stopped {
                    already_stopped: outcome.is_already_stopped(),
                    project: outcome.into_project(),
                })
        }
        ControlRequest::Destroy { project_id, .. } => orchestrator
            .destroy(project_id)
            .await
            .map(|()| ControlResponse::Destroyed { project_id }),
        ControlRequest::Get { project_id, .. } => orchestrator
            .get(project_id)
            .await
            .map(|project| ControlResponse::Project { project }),
        ControlRequest::Touch { project_id, .. } => {
            orchestrator.touch(project_id).await.map(|tracked| {
                if !tracked {
                    debug!(project_id = %project_id, "touch on a project that is not running");
                }
                ControlResponse::Touched { project_id }
            })
        }
        ControlRequest::List { owner_id } => {
            let projects = match owner_id {
                Some(owner_id) => orchestrator.list_for_owner(owner_id).await,
                None => orchestrator.list().await,
            };
            projects.map(|projects| ControlResponse::Projects { projects })
        }
        ControlRequest::Health => {
            let hosts = orchestrator.ping_hosts(ping_timeout).await;
            let health = DaemonHealth::from_hosts(
                hosts,
                started_at.elapsed().as_secs(),
                orchestrator.keeper().tracked_count(),
            );
            Ok(health.into_response())
        }
    };

    result.unwrap_or_else(|e| error_response(&e))
}

/// Map an orchestrator error onto the wire error shape.
pub fn error_response(err: &OrchestratorError) -> ControlResponse {
    if err.is_inconsistency() {
        error!(error = %err, kind = err.kind(), "control request left inconsistent state");
    }
    ControlResponse::error(err.kind(), err.to_string(), err.is_inconsistency())
}

fn record_request(op: &'static str, result: &'static str) {
    metrics::counter!(
        m::CONTROL_REQUESTS_TOTAL,
        m::LABEL_OPERATION => op,
        m::LABEL_RESULT => result
    )
    .increment(1);
}

/// Read one newline-terminated line of at most `max` bytes into `buf`.
///
/// An oversized line is consumed through its newline so the next read
/// starts at the following request.
async fn read_request_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> std::io::Result<RequestLine> {
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(RequestLine::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(RequestLine::Line);
    }

    if buf.len() <= max {
        // final line without a trailing newline
        return Ok(RequestLine::Line);
    }

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                break;
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
    Ok(RequestLine::TooLarge)
}

/// Bind the control socket, replacing a stale socket file.
fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new()
                .mode(0o755)
                .recursive(true)
                .create(parent)
                .map_err(|e| {
                    anyhow::anyhow!(
                        "failed to create control socket directory {}: {}",
                        parent.display(),
                        e
                    )
                })?;
        }
    }

    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            use std::os::unix::fs::FileTypeExt;
            if !meta.file_type().is_socket() {
                return Err(anyhow::anyhow!(
                    "control socket path {} exists and is not a socket",
                    path.display()
                ));
            }
            std::fs::remove_file(path)?;
            debug!(socket = %path.display(), "removed stale control socket");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = UnixListener::bind(path).map_err(|e| {
        anyhow::anyhow!("failed to bind control socket {}: {}", path.display(), e)
    })?;

    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(listener)
}

/// Remove the control socket file on shutdown.
pub fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(socket = %path.display(), "control socket removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket = %path.display(), error = %e, "failed to remove control socket"),
    }
}

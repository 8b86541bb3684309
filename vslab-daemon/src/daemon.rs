//! Daemon assembly and lifecycle management.
//!
//! The [`Daemon`] loads configuration, builds the orchestrator on top of the
//! configured store and engine hosts, and runs the provisioning service and
//! control socket until a shutdown signal arrives.
//!
//! # Startup Order
//!
//! 1. PID file
//! 2. Provisioning service (adopts running projects, pings hosts, starts the sweeper)
//! 3. Control socket
//! 4. Event logger and uptime updater
//!
//! # Shutdown Order
//!
//! 1. Control socket stops accepting, open connections finish their current request
//! 2. Background tasks exit
//! 3. Provisioning service stops (sweeper cancelled)
//! 4. Socket and PID file removed

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vslab_core::config::VslabConfig;
use vslab_core::event::{ProjectEvent, ProjectEventKind};
use vslab_core::pipeline::Pipeline;
use vslab_orchestrator::{
    BollardEngineFactory, ConfiguredStore, ContainerOrchestrator, ContainerOrchestratorBuilder,
    OrchestratorConfig, ProvisioningService,
};

use crate::control::{self, ControlServer};
use crate::health::DaemonHealth;
use crate::metrics_server;

/// Orchestrator type used by the production daemon.
pub type DaemonOrchestrator = ContainerOrchestrator<BollardEngineFactory, ConfiguredStore>;

/// Interval between uptime gauge updates.
const UPTIME_UPDATE_INTERVAL_SECS: u64 = 10;

/// The vslab daemon.
pub struct Daemon {
    /// Loaded and validated configuration.
    config: VslabConfig,
    /// Long-running part of the orchestrator.
    service: ProvisioningService<BollardEngineFactory, ConfiguredStore>,
    /// Cancels the control socket and background tasks.
    shutdown: CancellationToken,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
    /// Lifecycle events from the orchestrator.
    event_rx: Option<mpsc::Receiver<ProjectEvent>>,
}

impl Daemon {
    /// Load configuration from `config_path` and build the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read or parsed
    /// - Configuration validation fails
    /// - The project store cannot be opened
    pub async fn build(config_path: &Path) -> Result<Self> {
        let mut config = VslabConfig::from_file(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        config.apply_env_overrides();
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration.
    pub async fn build_from_config(config: VslabConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let orchestrator_config = OrchestratorConfig::from_core(&config);
        let factory = BollardEngineFactory::from_config(&orchestrator_config)
            .map_err(|e| anyhow::anyhow!("failed to create engine client factory: {}", e))?;
        let store = ConfiguredStore::from_config(&config.store.backend, &config.store.path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to open project store: {}", e))?;
        tracing::info!(
            backend = store.backend(),
            path = %config.store.path,
            "project store opened"
        );

        let host_count = orchestrator_config.hosts.len();
        let (orchestrator, event_rx) = ContainerOrchestratorBuilder::new()
            .config(orchestrator_config)
            .factory(Arc::new(factory))
            .store(Arc::new(store))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build orchestrator: {}", e))?;

        let service = ProvisioningService::new(Arc::new(orchestrator));

        if config.metrics.enabled {
            record_daemon_metrics(host_count);
        }

        tracing::info!(hosts = host_count, "daemon initialized");

        Ok(Self {
            config,
            service,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
            event_rx,
        })
    }

    /// Start everything and block until a shutdown signal is received.
    ///
    /// # Shutdown Triggers
    ///
    /// - `SIGTERM` (from systemd or `kill`)
    /// - `SIGINT` (Ctrl+C)
    pub async fn run(&mut self) -> Result<()> {
        let pid_file = self.config.general.pid_file.clone();
        if !pid_file.is_empty() {
            write_pid_file(Path::new(&pid_file))?;
        }

        if let Err(e) = self.service.start().await {
            tracing::error!(error = %e, "provisioning service failed to start");
            cleanup_pid_file(&pid_file);
            return Err(e.into());
        }

        let control = ControlServer::new(self.service.orchestrator(), &self.config.control)
            .with_start_time(self.start_time);
        let socket_path = control.socket_path().to_path_buf();
        let control_task = match control.spawn(self.shutdown.child_token()) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(error = %e, "control socket failed to start, rolling back");
                if let Err(stop_err) = self.service.stop().await {
                    tracing::error!(error = %stop_err, "rollback also failed");
                }
                cleanup_pid_file(&pid_file);
                return Err(e);
            }
        };

        let mut tasks = vec![control_task];
        if let Some(rx) = self.event_rx.take() {
            tasks.push(spawn_event_logger(rx, self.shutdown.child_token()));
        }
        if self.config.metrics.enabled {
            tasks.push(spawn_uptime_updater(
                self.start_time,
                self.shutdown.child_token(),
            ));
        }

        tracing::info!("vslab-daemon running");
        let signal = wait_for_shutdown_signal().await?;
        tracing::info!(signal = signal, "shutdown signal received");

        // the control task returns only after in-flight requests drain
        self.shutdown.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        if let Err(e) = self.service.stop().await {
            tracing::error!(error = %e, "failed to stop provisioning service");
        }

        control::remove_socket(&socket_path);
        cleanup_pid_file(&pid_file);
        Ok(())
    }

    /// Current aggregated health.
    pub async fn health(&self) -> DaemonHealth {
        let hosts = self.service.host_health().await;
        let tracked = self.service.orchestrator().keeper().tracked_count();
        DaemonHealth::from_hosts(hosts, self.start_time.elapsed().as_secs(), tracked)
    }

    /// Shared orchestrator handle.
    pub fn orchestrator(&self) -> Arc<DaemonOrchestrator> {
        self.service.orchestrator()
    }

    /// Loaded configuration.
    pub fn config(&self) -> &VslabConfig {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` refuses to overwrite an existing file
/// - The created file must be a regular file
/// - Parent directory is created with 0o700, the file with 0o600
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        );
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

fn cleanup_pid_file(pid_file: &str) {
    if !pid_file.is_empty() {
        remove_pid_file(Path::new(pid_file));
    }
}

/// Spawn a background task that logs project lifecycle events.
///
/// Inconsistencies are logged at warn level so operators can find
/// containers that need manual cleanup.
pub fn spawn_event_logger(
    mut event_rx: mpsc::Receiver<ProjectEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = event_rx.recv() => {
                    match received {
                        Some(event) => log_event(&event),
                        None => {
                            tracing::debug!("event channel closed, exiting logger");
                            break;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("event logger shutting down");
                    break;
                }
            }
        }
    })
}

fn log_event(event: &ProjectEvent) {
    let host = event
        .project
        .as_ref()
        .and_then(|p| p.host())
        .unwrap_or("-");
    if event.kind == ProjectEventKind::Inconsistent {
        tracing::warn!(
            event_id = %event.id,
            project_id = %event.project_id,
            host = host,
            source = %event.metadata.source_module,
            detail = event.detail.as_deref().unwrap_or(""),
            "project state inconsistent"
        );
    } else {
        tracing::info!(
            event_id = %event.id,
            kind = %event.kind,
            project_id = %event.project_id,
            host = host,
            source = %event.metadata.source_module,
            "project event"
        );
    }
}

/// Record daemon-level metrics (build info, engine host count).
fn record_daemon_metrics(host_count: usize) {
    use vslab_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_ENGINE_HOSTS).set(host_count as f64);

    tracing::debug!(
        host_count = host_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(start_time: Instant, cancel: CancellationToken) -> JoinHandle<()> {
    use vslab_core::metrics as m;

    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(UPTIME_UPDATE_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = cancel.cancelled() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

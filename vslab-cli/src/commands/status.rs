//! `vslab status` command handler

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use vslab_core::protocol::{ControlRequest, ControlResponse, HostHealth};

use crate::cli::StatusArgs;
use crate::client::ControlClient;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `status` command.
///
/// Liveness comes from the PID file; health comes from the control socket.
/// An unreachable socket is reported, not treated as a failure.
pub async fn execute(
    args: StatusArgs,
    pid_file: &str,
    socket_path: &Path,
    timeout: Duration,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let report = build_status_report(pid_file, socket_path, timeout, args.verbose).await?;
    writer.render(&report)?;
    Ok(())
}

/// Collect daemon liveness and, when reachable, its health answer.
pub async fn build_status_report(
    pid_file: &str,
    socket_path: &Path,
    timeout: Duration,
    verbose: bool,
) -> Result<StatusReport, CliError> {
    let pid = check_daemon_pid(pid_file);

    let (mut health, health_error) = match query_health(socket_path, timeout).await {
        Ok(h) => (Some(h), None),
        Err(CliError::DaemonUnavailable(reason)) => {
            debug!(reason, "control socket not reachable");
            (None, Some(reason))
        }
        Err(e) => return Err(e),
    };

    if let Some(h) = health.as_mut().filter(|_| !verbose) {
        h.hosts.clear();
    }

    Ok(StatusReport {
        daemon_running: pid.is_some() || health.is_some(),
        pid,
        socket: socket_path.display().to_string(),
        health,
        health_error,
    })
}

async fn query_health(socket_path: &Path, timeout: Duration) -> Result<HealthSummary, CliError> {
    let mut client = ControlClient::connect(socket_path, timeout).await?;
    match client.call(&ControlRequest::Health).await? {
        ControlResponse::Health {
            overall,
            tracked_projects,
            hosts,
        } => Ok(HealthSummary {
            overall: overall.to_string(),
            healthy: overall.is_healthy(),
            tracked_projects,
            reachable_hosts: hosts.iter().filter(|h| h.reachable).count(),
            total_hosts: hosts.len(),
            hosts,
        }),
        other => Err(CliError::Protocol(format!(
            "unexpected response to health request: {other:?}"
        ))),
    }
}

/// Read the PID file and return the PID when that process is alive.
fn check_daemon_pid(pid_file: &str) -> Option<u32> {
    let pid_content = match std::fs::read_to_string(pid_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(pid_file, "pid file does not exist");
            return None;
        }
        Err(e) => {
            warn!(pid_file, error = %e, "failed to read pid file");
            return None;
        }
    };

    let pid = match pid_content.trim().parse::<u32>() {
        Ok(p) => p,
        Err(e) => {
            warn!(pid_file, error = %e, "failed to parse pid");
            return None;
        }
    };

    is_process_alive(pid).then_some(pid)
}

/// Check if a process with the given PID is alive.
#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use std::io::ErrorKind;

    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with signal 0 performs only the existence and permission check
    let result = unsafe { libc::kill(pid, 0) };

    if result == 0 {
        true
    } else {
        // EPERM: the process exists but belongs to someone else
        std::io::Error::last_os_error().kind() == ErrorKind::PermissionDenied
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    false
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub socket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthSummary {
    pub overall: String,
    pub healthy: bool,
    pub tracked_projects: usize,
    pub reachable_hosts: usize,
    pub total_hosts: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<HostHealth>,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.daemon_running {
            let pid = self
                .pid
                .map(|p| format!("pid {p}"))
                .unwrap_or_else(|| "pid unknown".to_owned());
            writeln!(w, "Daemon: {} ({})", "running".green().bold(), pid)?;
        } else {
            writeln!(w, "Daemon: {}", "not running".red().bold())?;
        }
        writeln!(w, "Socket: {}", self.socket)?;

        match (&self.health, &self.health_error) {
            (Some(h), _) => {
                let overall = if h.healthy {
                    h.overall.green()
                } else {
                    h.overall.yellow()
                };
                writeln!(w, "Health: {overall}")?;
                writeln!(w, "Tracked projects: {}", h.tracked_projects)?;
                writeln!(w, "Hosts: {}/{} reachable", h.reachable_hosts, h.total_hosts)?;

                if !h.hosts.is_empty() {
                    writeln!(w)?;
                    writeln!(w, "{:<24} Reachable", "Host")?;
                    writeln!(w, "{}", "-".repeat(60))?;
                    for host in &h.hosts {
                        let state = if host.reachable {
                            "yes".green()
                        } else {
                            "no".red()
                        };
                        writeln!(w, "{:<24} {}", host.host, state)?;
                        if let Some(err) = &host.error {
                            writeln!(w, "  {}", err.dimmed())?;
                        }
                    }
                }
            }
            (None, Some(err)) => writeln!(w, "Health: {} ({})", "unavailable".red(), err)?,
            (None, None) => writeln!(w, "Health: {}", "unavailable".red())?,
        }

        Ok(())
    }
}

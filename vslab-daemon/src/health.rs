//! Aggregated health reporting.
//!
//! The daemon's health is the provisioning service's view of the engine
//! host pool plus a few process-level numbers.
//!
//! # Aggregation Rule
//!
//! - Every host reachable -> Healthy
//! - Some hosts unreachable -> Degraded(reason)
//! - No host reachable (or none configured) -> Unhealthy(reason)

use serde::Serialize;

use vslab_core::pipeline::HealthStatus;
use vslab_core::protocol::{ControlResponse, HostHealth};
use vslab_orchestrator::health_from_hosts;

/// Aggregated health report for the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall status derived from the host pool.
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Projects currently watched by the liveness keeper.
    pub tracked_projects: usize,
    /// Per-host reachability.
    pub hosts: Vec<HostHealth>,
}

impl DaemonHealth {
    /// Build a report from host ping results.
    pub fn from_hosts(hosts: Vec<HostHealth>, uptime_secs: u64, tracked_projects: usize) -> Self {
        Self {
            status: health_from_hosts(&hosts),
            uptime_secs,
            tracked_projects,
            hosts,
        }
    }

    /// Number of hosts that answered the ping.
    pub fn reachable_hosts(&self) -> usize {
        self.hosts.iter().filter(|h| h.reachable).count()
    }

    /// Convert into the control socket `health` response.
    pub fn into_response(self) -> ControlResponse {
        ControlResponse::Health {
            overall: self.status,
            tracked_projects: self.tracked_projects,
            hosts: self.hosts,
        }
    }
}

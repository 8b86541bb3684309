//! 유휴 추적기: 프로젝트별 마지막 활동 시각과 주기적 회수
//!
//! [`LivenessKeeper`]는 실행 중인 프로젝트의 마지막 활동 시각만 기록합니다.
//! 회수 자체는 [`Reclaimer`]에 위임하며, 오케스트레이터가 이를 구현해
//! 프로젝트 잠금 아래에서 만료를 다시 확인하고 정지합니다.
//!
//! 시각은 `tokio::time::Instant`를 사용하므로 테스트에서 시간을 멈추고
//! 앞당겨 검증할 수 있습니다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vslab_core::metrics as m;
use vslab_core::types::ProjectId;

use crate::error::OrchestratorError;

/// 회수 시도의 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimOutcome {
    /// 컨테이너를 제거하고 배치를 지움
    Reclaimed,
    /// 잠금을 기다리는 동안 활동이 갱신되어 건너뜀
    StillActive,
    /// 이미 정지되어 있었음
    AlreadyStopped,
}

impl ReclaimOutcome {
    /// 메트릭 레이블 값
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reclaimed => "reclaimed",
            Self::StillActive => "still_active",
            Self::AlreadyStopped => "already_stopped",
        }
    }
}

/// 만료된 프로젝트를 회수하는 주체
pub trait Reclaimer: Send + Sync + 'static {
    /// 프로젝트를 회수합니다.
    fn reclaim(
        &self,
        project_id: ProjectId,
    ) -> impl Future<Output = Result<ReclaimOutcome, OrchestratorError>> + Send;
}

/// 한 번의 스윕 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 만료로 판정된 프로젝트 수
    pub expired: usize,
    /// 실제로 회수된 수
    pub reclaimed: usize,
    /// 이미 정지됐거나 다시 활성화되어 건너뛴 수
    pub skipped: usize,
    /// 회수에 실패한 수 (다음 스윕에서 재시도)
    pub failed: usize,
}

/// 프로젝트 활동 시각 추적기
pub struct LivenessKeeper {
    last_seen: Mutex<HashMap<ProjectId, Instant>>,
    idle_timeout: Duration,
}

impl LivenessKeeper {
    /// 유휴 한도로 추적기를 생성합니다.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            last_seen: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<ProjectId, Instant>> {
        self.last_seen.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish_gauge(count: usize) {
        gauge!(m::KEEPER_TRACKED_PROJECTS).set(count as f64);
    }

    /// 유휴 한도
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// 활동 시각을 현재로 갱신합니다. 추적 중이 아니면 새로 추적합니다.
    pub fn refresh_active_time(&self, project_id: ProjectId) {
        let mut entries = self.entries();
        entries.insert(project_id, Instant::now());
        Self::publish_gauge(entries.len());
    }

    /// 이미 추적 중인 프로젝트만 활동 시각을 갱신합니다.
    ///
    /// 정지된 프로젝트가 외부 활동 신호로 되살아나지 않도록 합니다.
    pub fn touch_if_tracked(&self, project_id: ProjectId) -> bool {
        match self.entries().get_mut(&project_id) {
            Some(seen) => {
                *seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// 추적을 중단합니다. 추적 중이었으면 `true`입니다.
    pub fn remove_keep(&self, project_id: ProjectId) -> bool {
        let mut entries = self.entries();
        let removed = entries.remove(&project_id).is_some();
        Self::publish_gauge(entries.len());
        removed
    }

    /// 추적 중인지 확인합니다.
    pub fn is_tracked(&self, project_id: ProjectId) -> bool {
        self.entries().contains_key(&project_id)
    }

    /// 추적 중인 프로젝트 수
    pub fn tracked_count(&self) -> usize {
        self.entries().len()
    }

    /// 마지막 활동 시각
    pub fn last_seen(&self, project_id: ProjectId) -> Option<Instant> {
        self.entries().get(&project_id).copied()
    }

    /// `now` 기준으로 유휴 한도를 넘겼는지 확인합니다.
    ///
    /// 추적 중이 아닌 프로젝트는 만료로 보지 않습니다.
    pub fn is_expired(&self, project_id: ProjectId, now: Instant) -> bool {
        self.entries()
            .get(&project_id)
            .is_some_and(|seen| now.saturating_duration_since(*seen) > self.idle_timeout)
    }

    /// `now` 기준으로 만료된 프로젝트 목록 (ID 순)
    pub fn expired(&self, now: Instant) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self
            .entries()
            .iter()
            .filter(|(_, seen)| now.saturating_duration_since(**seen) > self.idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// 만료된 프로젝트를 한 번 회수합니다.
///
/// 회수는 동시에 진행되며, 실패는 기록만 하고 다음 스윕에서 다시 시도됩니다.
pub async fn sweep_once<R: Reclaimer>(keeper: &LivenessKeeper, reclaimer: &Arc<R>) -> SweepReport {
    let expired = keeper.expired(Instant::now());
    let mut report = SweepReport {
        expired: expired.len(),
        ..SweepReport::default()
    };
    if expired.is_empty() {
        return report;
    }

    debug!(count = expired.len(), "reclaiming idle projects");

    let mut set = JoinSet::new();
    for project_id in expired {
        let reclaimer = Arc::clone(reclaimer);
        set.spawn(async move { (project_id, reclaimer.reclaim(project_id).await) });
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((project_id, Ok(outcome))) => {
                counter!(m::KEEPER_RECLAIMS_TOTAL, m::LABEL_RESULT => outcome.as_str())
                    .increment(1);
                match outcome {
                    ReclaimOutcome::Reclaimed => {
                        report.reclaimed += 1;
                        info!(project_id = %project_id, "idle project reclaimed");
                    }
                    ReclaimOutcome::StillActive | ReclaimOutcome::AlreadyStopped => {
                        report.skipped += 1;
                        debug!(
                            project_id = %project_id,
                            outcome = outcome.as_str(),
                            "reclaim skipped"
                        );
                    }
                }
            }
            Ok((project_id, Err(e))) => {
                counter!(m::KEEPER_RECLAIMS_TOTAL, m::LABEL_RESULT => "failed").increment(1);
                report.failed += 1;
                warn!(
                    project_id = %project_id,
                    kind = e.kind(),
                    error = %e,
                    "reclaim failed, will retry on next sweep"
                );
            }
            Err(e) => {
                counter!(m::KEEPER_RECLAIMS_TOTAL, m::LABEL_RESULT => "failed").increment(1);
                report.failed += 1;
                warn!(error = %e, "reclaim task aborted");
            }
        }
    }

    report
}

/// 주기적으로 스윕을 실행하는 태스크를 띄웁니다.
///
/// 첫 스윕은 한 주기가 지난 뒤 실행됩니다. `shutdown`이 취소되면 종료합니다.
pub fn spawn_sweeper<R: Reclaimer>(
    keeper: Arc<LivenessKeeper>,
    reclaimer: Arc<R>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = interval.as_secs(),
            idle_timeout_secs = keeper.idle_timeout().as_secs(),
            "liveness sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("liveness sweeper stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let report = sweep_once(&keeper, &reclaimer).await;
                    if report.expired > 0 {
                        info!(
                            expired = report.expired,
                            reclaimed = report.reclaimed,
                            skipped = report.skipped,
                            failed = report.failed,
                            "sweep finished"
                        );
                    }
                }
            }
        }
    })
}

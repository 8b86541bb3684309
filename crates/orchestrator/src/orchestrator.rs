//! 컨테이너 오케스트레이터: 프로젝트 생명주기 상태 기계
//!
//! [`ContainerOrchestrator`]는 예약 → 기동 → 정지 → 파기 흐름을 실행합니다.
//!
//! # 상태 전이
//! ```text
//! reserve ──▶ [예약됨] ──start──▶ [실행 중] ──stop/reclaim──▶ [예약됨] ──destroy──▶ (삭제)
//!                 ▲                   │
//!                 └─── start 실패 ────┘ (1~4단계 실패는 레코드를 건드리지 않음)
//! ```
//!
//! # 동시성
//! 같은 프로젝트에 대한 start/stop/destroy/reclaim은 [`ProjectLocks`]로 직렬화됩니다.
//! 서로 다른 프로젝트는 병렬로 진행됩니다. 엔진 호출과 포트 발견 대기 중에는
//! 해당 프로젝트의 잠금만 잡고 있습니다.
//!
//! # 불일치
//! 엔진 작업은 끝났지만 기록이 따라가지 못한 경우(포트 발견 초과, 배치 기록 실패,
//! 레코드 삭제 실패)에는 `Inconsistent` 이벤트와 메트릭을 남기고 에러를 반환합니다.
//! 자동 재시도는 하지 않습니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use vslab_core::error::{EngineError, StoreError};
use vslab_core::event::{MODULE_KEEPER, MODULE_ORCHESTRATOR, ProjectEvent, ProjectEventKind};
use vslab_core::metrics as m;
use vslab_core::protocol::HostHealth;
use vslab_core::types::{
    ImageKind, NewProject, OwnerId, Placement, Project, ProjectId, short_container_id,
};

use crate::config::OrchestratorConfig;
use crate::engine::EngineClient;
use crate::error::OrchestratorError;
use crate::hosts::EngineClientFactory;
use crate::keeper::{LivenessKeeper, ReclaimOutcome, Reclaimer};
use crate::locks::ProjectLocks;
use crate::plan::PortPlan;
use crate::ports::PortDiscovery;
use crate::store::ProjectStore;

/// `start` 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// 새 컨테이너를 기동함
    Started(Project),
    /// 이미 실행 중이라 아무것도 하지 않음
    AlreadyRunning(Project),
}

impl StartOutcome {
    /// 결과에 담긴 프로젝트
    pub fn project(&self) -> &Project {
        match self {
            Self::Started(p) | Self::AlreadyRunning(p) => p,
        }
    }

    /// 프로젝트를 꺼냅니다.
    pub fn into_project(self) -> Project {
        match self {
            Self::Started(p) | Self::AlreadyRunning(p) => p,
        }
    }

    /// 이미 실행 중이었는지 확인합니다.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning(_))
    }
}

/// `stop` 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// 컨테이너를 제거하고 배치를 지움
    Stopped(Project),
    /// 이미 정지되어 있었음
    AlreadyStopped(Project),
}

impl StopOutcome {
    /// 결과에 담긴 프로젝트
    pub fn project(&self) -> &Project {
        match self {
            Self::Stopped(p) | Self::AlreadyStopped(p) => p,
        }
    }

    /// 프로젝트를 꺼냅니다.
    pub fn into_project(self) -> Project {
        match self {
            Self::Stopped(p) | Self::AlreadyStopped(p) => p,
        }
    }

    /// 이미 정지되어 있었는지 확인합니다.
    pub fn is_already_stopped(&self) -> bool {
        matches!(self, Self::AlreadyStopped(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Requested,
    Reclaimed,
}

impl StopReason {
    fn event_kind(self) -> ProjectEventKind {
        match self {
            Self::Requested => ProjectEventKind::Stopped,
            Self::Reclaimed => ProjectEventKind::Reclaimed,
        }
    }

    fn source_module(self) -> &'static str {
        match self {
            Self::Requested => MODULE_ORCHESTRATOR,
            Self::Reclaimed => MODULE_KEEPER,
        }
    }
}

/// 컨테이너 오케스트레이터
///
/// 엔진 클라이언트 팩토리와 프로젝트 저장소에 대해 제네릭입니다.
/// [`ContainerOrchestratorBuilder`]로 생성합니다.
pub struct ContainerOrchestrator<F: EngineClientFactory, S: ProjectStore> {
    config: OrchestratorConfig,
    plan: PortPlan,
    discovery: PortDiscovery,
    factory: Arc<F>,
    store: Arc<S>,
    keeper: Arc<LivenessKeeper>,
    locks: ProjectLocks,
    events: mpsc::Sender<ProjectEvent>,
    starts_completed: AtomicU64,
    stops_completed: AtomicU64,
    reclaims_completed: AtomicU64,
    inconsistencies: AtomicU64,
}

impl<F: EngineClientFactory, S: ProjectStore> ContainerOrchestrator<F, S> {
    /// 새 프로젝트를 예약합니다. 엔진에는 접근하지 않습니다.
    pub async fn reserve(
        &self,
        owner_id: OwnerId,
        name: impl Into<String>,
        image_kind: ImageKind,
    ) -> Result<Project, OrchestratorError> {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return Err(OrchestratorError::ReservationFailed(
                "project name must not be empty".to_owned(),
            ));
        }

        let project = self
            .store
            .reserve(NewProject {
                owner_id,
                name: name.to_owned(),
                image_kind,
            })
            .await
            .map_err(|e| OrchestratorError::ReservationFailed(e.to_string()))?;

        counter!(
            m::ORCHESTRATOR_PROJECTS_RESERVED_TOTAL,
            m::LABEL_IMAGE_KIND => image_kind.as_str()
        )
        .increment(1);
        info!(
            project_id = %project.id,
            owner_id = %owner_id,
            image_kind = %image_kind,
            "project reserved"
        );
        self.emit(
            ProjectEvent::new(ProjectEventKind::Reserved, project.id, MODULE_ORCHESTRATOR)
                .with_project(project.clone()),
        );
        Ok(project)
    }

    /// 프로젝트 레코드를 조회합니다.
    pub async fn get(&self, project_id: ProjectId) -> Result<Project, OrchestratorError> {
        Ok(self.store.get(project_id).await?)
    }

    /// 모든 프로젝트를 조회합니다.
    pub async fn list(&self) -> Result<Vec<Project>, OrchestratorError> {
        Ok(self.store.list().await?)
    }

    /// 소유자의 프로젝트만 조회합니다.
    pub async fn list_for_owner(&self, owner_id: OwnerId) -> Result<Vec<Project>, OrchestratorError> {
        let mut projects = self.store.list().await?;
        projects.retain(|p| p.owner_id == owner_id);
        Ok(projects)
    }

    /// 프로젝트 컨테이너를 기동합니다.
    ///
    /// 이미 실행 중이면 활동 시각만 갱신하고 `AlreadyRunning`을 반환합니다.
    /// 호스트 선택부터 컨테이너 시작까지의 실패는 레코드를 바꾸지 않습니다.
    pub async fn start(&self, project_id: ProjectId) -> Result<StartOutcome, OrchestratorError> {
        let _lock = self.locks.lock(project_id).await;

        let project = self.store.get(project_id).await?;
        if project.is_materialized() {
            self.keeper.refresh_active_time(project_id);
            counter!(m::ORCHESTRATOR_STARTS_TOTAL, m::LABEL_RESULT => "already_running")
                .increment(1);
            debug!(project_id = %project_id, "project already running");
            return Ok(StartOutcome::AlreadyRunning(project));
        }

        let started_at = std::time::Instant::now();
        let image_kind = project.image_kind;
        match self.materialize(project).await {
            Ok(project) => {
                histogram!(m::ORCHESTRATOR_START_DURATION_SECONDS)
                    .record(started_at.elapsed().as_secs_f64());
                counter!(
                    m::ORCHESTRATOR_STARTS_TOTAL,
                    m::LABEL_RESULT => "started",
                    m::LABEL_IMAGE_KIND => image_kind.as_str()
                )
                .increment(1);
                self.starts_completed.fetch_add(1, Ordering::Relaxed);

                if let Some(placement) = &project.placement {
                    info!(
                        project_id = %project_id,
                        host = %placement.host,
                        container_id = %placement.container_id,
                        server_port = placement.ports.server_port,
                        terminal_port = placement.ports.terminal_port,
                        language_port = placement.ports.language_port,
                        "project started"
                    );
                }
                self.emit(
                    ProjectEvent::new(ProjectEventKind::Started, project_id, MODULE_ORCHESTRATOR)
                        .with_project(project.clone()),
                );
                Ok(StartOutcome::Started(project))
            }
            Err(e) => {
                counter!(m::ORCHESTRATOR_STARTS_TOTAL, m::LABEL_RESULT => e.kind()).increment(1);
                if e.is_inconsistency() {
                    self.record_inconsistency(project_id, &e);
                } else {
                    warn!(project_id = %project_id, kind = e.kind(), error = %e, "project start failed");
                }
                Err(e)
            }
        }
    }

    async fn materialize(&self, mut project: Project) -> Result<Project, OrchestratorError> {
        let host = self.factory.registry().select_random()?.to_owned();
        let client = self.factory.client(&host)?;

        let spec = self.plan.container_spec(project.image_kind, &host);
        debug!(
            project_id = %project.id,
            host = %host,
            image = %spec.image,
            "creating container"
        );
        let full_id = client.create_container(&spec).await.map_err(|e| match e {
            EngineError::HostUnreachable { reason, .. } => OrchestratorError::HostUnreachable {
                host: host.clone(),
                reason,
            },
            other => OrchestratorError::ContainerCreateFailed {
                host: host.clone(),
                reason: other.to_string(),
            },
        })?;
        let container_id = short_container_id(&full_id).to_owned();

        if let Err(e) = client.start_container(&container_id).await {
            if let Err(cleanup) = client.remove_container(&container_id, true).await {
                warn!(
                    host = %host,
                    container_id = %container_id,
                    error = %cleanup,
                    "failed to remove container after start failure"
                );
            }
            return Err(OrchestratorError::ContainerStartFailed {
                host,
                container_id,
                reason: e.to_string(),
            });
        }

        let ports = self
            .discovery
            .discover(&*client, &host, &container_id, &self.plan)
            .await?;

        project.placement = Some(Placement {
            host,
            container_id,
            ports,
        });
        self.store
            .update(&project)
            .await
            .map_err(|e| OrchestratorError::PersistFailed {
                project_id: project.id,
                reason: e.to_string(),
            })?;

        self.keeper.refresh_active_time(project.id);
        Ok(project)
    }

    /// 프로젝트 컨테이너를 정지합니다. 레코드는 배치 없이 남습니다.
    pub async fn stop(&self, project_id: ProjectId) -> Result<StopOutcome, OrchestratorError> {
        let _lock = self.locks.lock(project_id).await;
        self.stop_locked(project_id, StopReason::Requested).await
    }

    async fn stop_locked(
        &self,
        project_id: ProjectId,
        reason: StopReason,
    ) -> Result<StopOutcome, OrchestratorError> {
        let mut project = self.store.get(project_id).await?;
        let Some(placement) = project.placement.clone() else {
            self.keeper.remove_keep(project_id);
            counter!(m::ORCHESTRATOR_STOPS_TOTAL, m::LABEL_RESULT => "already_stopped")
                .increment(1);
            return Ok(StopOutcome::AlreadyStopped(project));
        };

        let result = self.remove_and_clear(&mut project, &placement).await;
        match result {
            Ok(()) => {
                counter!(m::ORCHESTRATOR_STOPS_TOTAL, m::LABEL_RESULT => "stopped").increment(1);
                self.stops_completed.fetch_add(1, Ordering::Relaxed);
                if reason == StopReason::Reclaimed {
                    self.reclaims_completed.fetch_add(1, Ordering::Relaxed);
                }
                info!(
                    project_id = %project_id,
                    host = %placement.host,
                    container_id = %placement.container_id,
                    reclaimed = reason == StopReason::Reclaimed,
                    "project stopped"
                );
                self.emit(
                    ProjectEvent::new(reason.event_kind(), project_id, reason.source_module())
                        .with_project(project.clone()),
                );
                Ok(StopOutcome::Stopped(project))
            }
            Err(e) => {
                counter!(m::ORCHESTRATOR_STOPS_TOTAL, m::LABEL_RESULT => e.kind()).increment(1);
                if e.is_inconsistency() {
                    self.record_inconsistency(project_id, &e);
                } else {
                    warn!(project_id = %project_id, kind = e.kind(), error = %e, "project stop failed");
                }
                Err(e)
            }
        }
    }

    async fn remove_and_clear(
        &self,
        project: &mut Project,
        placement: &Placement,
    ) -> Result<(), OrchestratorError> {
        let client = self.factory.client(&placement.host)?;
        match client.remove_container(&placement.container_id, true).await {
            Ok(()) => {}
            Err(EngineError::ContainerNotFound(_)) => {
                warn!(
                    project_id = %project.id,
                    host = %placement.host,
                    container_id = %placement.container_id,
                    "container already gone from engine"
                );
            }
            Err(e) => {
                return Err(OrchestratorError::ContainerRemoveFailed {
                    host: placement.host.clone(),
                    container_id: placement.container_id.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // 기록이 지워지기 전까지는 추적을 유지해 다음 회수에서 다시 시도됨
        project.placement = None;
        self.store
            .update(project)
            .await
            .map_err(|e| OrchestratorError::PersistFailed {
                project_id: project.id,
                reason: e.to_string(),
            })?;
        self.keeper.remove_keep(project.id);
        Ok(())
    }

    /// 프로젝트를 정지하고 레코드를 삭제합니다.
    ///
    /// 정지와 삭제 사이에 다른 요청이 끼어들지 않습니다.
    pub async fn destroy(&self, project_id: ProjectId) -> Result<(), OrchestratorError> {
        let _lock = self.locks.lock(project_id).await;

        self.stop_locked(project_id, StopReason::Requested).await?;

        match self.store.delete(project_id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                let err = OrchestratorError::OrphanedRecord {
                    project_id,
                    reason: e.to_string(),
                };
                counter!(m::ORCHESTRATOR_DESTROYS_TOTAL, m::LABEL_RESULT => err.kind())
                    .increment(1);
                self.record_inconsistency(project_id, &err);
                return Err(err);
            }
        }

        counter!(m::ORCHESTRATOR_DESTROYS_TOTAL, m::LABEL_RESULT => "destroyed").increment(1);
        info!(project_id = %project_id, "project destroyed");
        self.emit(ProjectEvent::new(
            ProjectEventKind::Destroyed,
            project_id,
            MODULE_ORCHESTRATOR,
        ));
        Ok(())
    }

    /// 외부 활동 신호를 반영합니다.
    ///
    /// 실행 중인 프로젝트면 `true`, 정지 상태라 반영할 것이 없으면 `false`입니다.
    pub async fn touch(&self, project_id: ProjectId) -> Result<bool, OrchestratorError> {
        self.store.get(project_id).await?;
        Ok(self.keeper.touch_if_tracked(project_id))
    }

    /// 저장소의 실행 중인 프로젝트를 모두 추적 대상으로 등록합니다.
    ///
    /// 이전 실행에서 남은 컨테이너도 유휴 한도가 지나면 회수됩니다.
    pub async fn adopt_running(&self) -> Result<usize, OrchestratorError> {
        let projects = self.store.list().await?;
        let mut adopted = 0;
        for project in projects.iter().filter(|p| p.is_materialized()) {
            self.keeper.refresh_active_time(project.id);
            adopted += 1;
        }
        info!(adopted = adopted, total = projects.len(), "running projects adopted");
        Ok(adopted)
    }

    /// 모든 엔진 호스트에 ping을 보냅니다. 호스트마다 `timeout`이 적용됩니다.
    pub async fn ping_hosts(&self, timeout: Duration) -> Vec<HostHealth> {
        let mut report = Vec::with_capacity(self.factory.registry().len());
        for host in self.factory.registry().hosts() {
            let outcome = match self.factory.client(host) {
                Ok(client) => match tokio::time::timeout(timeout, client.ping()).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("ping timed out after {}ms", timeout.as_millis())),
                },
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => report.push(HostHealth {
                    host: host.clone(),
                    reachable: true,
                    error: None,
                }),
                Err(reason) => {
                    debug!(host = %host, error = %reason, "engine host ping failed");
                    report.push(HostHealth {
                        host: host.clone(),
                        reachable: false,
                        error: Some(reason),
                    });
                }
            }
        }
        report
    }

    fn record_inconsistency(&self, project_id: ProjectId, err: &OrchestratorError) {
        self.inconsistencies.fetch_add(1, Ordering::Relaxed);
        counter!(m::ORCHESTRATOR_INCONSISTENCIES_TOTAL, m::LABEL_RESULT => err.kind())
            .increment(1);
        error!(
            project_id = %project_id,
            kind = err.kind(),
            error = %err,
            "engine state and project record diverged, manual cleanup required"
        );
        self.emit(
            ProjectEvent::new(ProjectEventKind::Inconsistent, project_id, MODULE_ORCHESTRATOR)
                .with_detail(err.to_string()),
        );
    }

    fn emit(&self, event: ProjectEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!(error = %e, "project event dropped");
        }
    }

    /// 오케스트레이터 설정
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// 포트 계획
    pub fn plan(&self) -> &PortPlan {
        &self.plan
    }

    /// 유휴 추적기
    pub fn keeper(&self) -> &Arc<LivenessKeeper> {
        &self.keeper
    }

    /// 프로젝트 저장소
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 엔진 클라이언트 팩토리
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// 현재 잡혀 있거나 대기 중인 프로젝트 잠금 수
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    /// 완료된 기동 수
    pub fn starts_completed(&self) -> u64 {
        self.starts_completed.load(Ordering::Relaxed)
    }

    /// 완료된 정지 수 (회수 포함)
    pub fn stops_completed(&self) -> u64 {
        self.stops_completed.load(Ordering::Relaxed)
    }

    /// 유휴 회수 수
    pub fn reclaims_completed(&self) -> u64 {
        self.reclaims_completed.load(Ordering::Relaxed)
    }

    /// 기록된 불일치 수
    pub fn inconsistencies(&self) -> u64 {
        self.inconsistencies.load(Ordering::Relaxed)
    }
}

impl<F: EngineClientFactory, S: ProjectStore> Reclaimer for ContainerOrchestrator<F, S> {
    async fn reclaim(&self, project_id: ProjectId) -> Result<ReclaimOutcome, OrchestratorError> {
        let _lock = self.locks.lock(project_id).await;

        // 잠금을 기다리는 동안 갱신되었을 수 있음
        if !self
            .keeper
            .is_expired(project_id, tokio::time::Instant::now())
        {
            return Ok(if self.keeper.is_tracked(project_id) {
                ReclaimOutcome::StillActive
            } else {
                ReclaimOutcome::AlreadyStopped
            });
        }

        match self.stop_locked(project_id, StopReason::Reclaimed).await {
            Ok(StopOutcome::Stopped(_)) => Ok(ReclaimOutcome::Reclaimed),
            Ok(StopOutcome::AlreadyStopped(_)) => Ok(ReclaimOutcome::AlreadyStopped),
            Err(OrchestratorError::ProjectNotFound(_)) => {
                self.keeper.remove_keep(project_id);
                Ok(ReclaimOutcome::AlreadyStopped)
            }
            Err(e) => Err(e),
        }
    }
}

/// 오케스트레이터 빌더
///
/// 이벤트 송신자를 주지 않으면 내부 채널을 만들고 수신자를 함께 돌려줍니다.
pub struct ContainerOrchestratorBuilder<F: EngineClientFactory, S: ProjectStore> {
    config: OrchestratorConfig,
    factory: Option<Arc<F>>,
    store: Option<Arc<S>>,
    event_sender: Option<mpsc::Sender<ProjectEvent>>,
}

impl<F: EngineClientFactory, S: ProjectStore> ContainerOrchestratorBuilder<F, S> {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            factory: None,
            store: None,
            event_sender: None,
        }
    }

    /// 오케스트레이터 설정을 지정합니다.
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// 엔진 클라이언트 팩토리를 지정합니다.
    pub fn factory(mut self, factory: Arc<F>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// 프로젝트 저장소를 지정합니다.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// 외부 이벤트 송신자를 지정합니다.
    pub fn event_sender(mut self, tx: mpsc::Sender<ProjectEvent>) -> Self {
        self.event_sender = Some(tx);
        self
    }

    /// 오케스트레이터를 생성합니다.
    ///
    /// # Returns
    /// - `(orchestrator, Some(rx))`: 송신자를 지정하지 않은 경우
    /// - `(orchestrator, None)`: 외부 송신자를 사용하는 경우
    pub fn build(
        self,
    ) -> Result<
        (
            ContainerOrchestrator<F, S>,
            Option<mpsc::Receiver<ProjectEvent>>,
        ),
        OrchestratorError,
    > {
        self.config.validate()?;

        let factory = self.factory.ok_or_else(|| OrchestratorError::Config {
            field: "factory".to_owned(),
            reason: "engine client factory must be provided".to_owned(),
        })?;
        let store = self.store.ok_or_else(|| OrchestratorError::Config {
            field: "store".to_owned(),
            reason: "project store must be provided".to_owned(),
        })?;

        let plan = self.config.port_plan()?;
        let discovery = PortDiscovery::new(
            self.config.discovery_interval(),
            self.config.discovery_max_attempts,
        );
        let keeper = Arc::new(LivenessKeeper::new(self.config.idle_timeout()));

        let (events, rx) = match self.event_sender {
            Some(tx) => (tx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.config.event_channel_capacity);
                (tx, Some(rx))
            }
        };

        let orchestrator = ContainerOrchestrator {
            config: self.config,
            plan,
            discovery,
            factory,
            store,
            keeper,
            locks: ProjectLocks::new(),
            events,
            starts_completed: AtomicU64::new(0),
            stops_completed: AtomicU64::new(0),
            reclaims_completed: AtomicU64::new(0),
            inconsistencies: AtomicU64::new(0),
        };

        Ok((orchestrator, rx))
    }
}

impl<F: EngineClientFactory, S: ProjectStore> Default for ContainerOrchestratorBuilder<F, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfigBuilder;
    use crate::engine::MockEngineClient;
    use crate::hosts::MockEngineFactory;
    use crate::store::MemoryProjectStore;
    use std::collections::HashSet;

    type TestOrchestrator = ContainerOrchestrator<MockEngineFactory, MemoryProjectStore>;

    const HOSTS: [&str; 3] = ["10.0.0.1", "10.0.0.2", "10.0.0.3"];

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfigBuilder::new()
            .hosts(HOSTS)
            .discovery_interval_ms(10)
            .discovery_max_attempts(5)
            .build()
            .unwrap()
    }

    fn build_with(
        factory: MockEngineFactory,
    ) -> (
        Arc<TestOrchestrator>,
        Arc<MockEngineFactory>,
        mpsc::Receiver<ProjectEvent>,
    ) {
        let factory = Arc::new(factory);
        let (orch, rx) = ContainerOrchestratorBuilder::new()
            .config(test_config())
            .factory(Arc::clone(&factory))
            .store(Arc::new(MemoryProjectStore::new()))
            .build()
            .unwrap();
        (Arc::new(orch), factory, rx.unwrap())
    }

    fn build() -> (
        Arc<TestOrchestrator>,
        Arc<MockEngineFactory>,
        mpsc::Receiver<ProjectEvent>,
    ) {
        build_with(MockEngineFactory::new(&HOSTS))
    }

    fn drain(rx: &mut mpsc::Receiver<ProjectEvent>) -> Vec<ProjectEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn reserve_does_not_touch_engine() {
        let (orch, factory, mut rx) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Python3)
            .await
            .unwrap();
        assert!(!project.is_materialized());
        assert_eq!(factory.total_creates(), 0);
        assert_eq!(drain(&mut rx), vec![ProjectEventKind::Reserved]);
    }

    #[tokio::test]
    async fn reserve_rejects_blank_name() {
        let (orch, _, _) = build();
        let err = orch
            .reserve(OwnerId::new(1), "   ", ImageKind::Java)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ReservationFailed(_)));
    }

    #[tokio::test]
    async fn start_places_container_on_registered_host() {
        let (orch, factory, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Cpp)
            .await
            .unwrap();

        let outcome = orch.start(project.id).await.unwrap();
        assert!(!outcome.is_already_running());
        let started = outcome.into_project();
        let placement = started.placement.clone().unwrap();
        assert!(HOSTS.contains(&placement.host.as_str()));
        assert_eq!(placement.container_id.len(), 12);
        assert!(placement.ports.is_well_formed());

        let mock = factory.mock(&placement.host);
        let spec = mock.spec_of(&placement.container_id).unwrap();
        assert_eq!(spec.image, vslab_core::types::CPP_IMAGE);
        assert_eq!(spec.env, vec![format!("HOST_IP={}", placement.host)]);

        assert_eq!(orch.get(project.id).await.unwrap(), started);
        assert!(orch.keeper().is_tracked(project.id));
        assert_eq!(orch.starts_completed(), 1);
    }

    #[tokio::test]
    async fn second_start_is_already_running() {
        let (orch, factory, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        let first = orch.start(project.id).await.unwrap().into_project();
        let second = orch.start(project.id).await.unwrap();
        assert!(second.is_already_running());
        assert_eq!(second.project(), &first);
        assert_eq!(factory.total_creates(), 1);
    }

    #[tokio::test]
    async fn concurrent_starts_create_one_container() {
        let (orch, factory, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "race", ImageKind::Python2)
            .await
            .unwrap();

        let id = project.id;
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let orch = Arc::clone(&orch);
            tasks.push(tokio::spawn(async move { orch.start(id).await }));
        }
        let mut containers = HashSet::new();
        for task in tasks {
            let outcome = task.await.unwrap().unwrap();
            containers.insert(outcome.project().container_id().unwrap().to_owned());
        }

        assert_eq!(containers.len(), 1);
        assert_eq!(factory.total_creates(), 1);
        assert_eq!(factory.total_containers(), 1);
        assert_eq!(orch.active_locks(), 0);
    }

    #[tokio::test]
    async fn start_unknown_project_is_not_found() {
        let (orch, factory, _) = build();
        let err = orch.start(ProjectId::new(404)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProjectNotFound(_)));
        assert_eq!(factory.total_creates(), 0);
    }

    #[tokio::test]
    async fn create_failure_leaves_record_untouched() {
        let (orch, _, _) =
            build_with(MockEngineFactory::with_client(&HOSTS, |_| {
                MockEngineClient::new().with_failing_create()
            }));
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        let err = orch.start(project.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerCreateFailed { .. }));
        assert!(!err.is_inconsistency());
        assert_eq!(orch.get(project.id).await.unwrap(), project);
        assert!(!orch.keeper().is_tracked(project.id));
    }

    #[tokio::test]
    async fn start_failure_removes_created_container() {
        let (orch, factory, _) =
            build_with(MockEngineFactory::with_client(&HOSTS, |_| {
                MockEngineClient::new().with_failing_start()
            }));
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        let err = orch.start(project.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerStartFailed { .. }));
        assert_eq!(factory.total_creates(), 1);
        assert_eq!(factory.total_containers(), 0);
        assert!(!orch.get(project.id).await.unwrap().is_materialized());
    }

    #[tokio::test]
    async fn discovery_timeout_is_reported_as_inconsistency() {
        let (orch, factory, mut rx) =
            build_with(MockEngineFactory::with_client(&HOSTS, |_| {
                MockEngineClient::new().with_unpublished_ports()
            }));
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        drain(&mut rx);

        let err = orch.start(project.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::PortDiscoveryTimeout { attempts: 5, .. }));
        assert!(err.is_inconsistency());
        // 컨테이너는 호스트에 남고 레코드는 바뀌지 않음
        assert_eq!(factory.total_containers(), 1);
        assert!(!orch.get(project.id).await.unwrap().is_materialized());
        assert_eq!(orch.inconsistencies(), 1);
        assert_eq!(drain(&mut rx), vec![ProjectEventKind::Inconsistent]);
    }

    #[tokio::test]
    async fn stop_removes_container_and_keeps_record() {
        let (orch, factory, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Python3)
            .await
            .unwrap();
        orch.start(project.id).await.unwrap();

        let stopped = orch.stop(project.id).await.unwrap();
        assert!(!stopped.is_already_stopped());
        let record = orch.get(project.id).await.unwrap();
        assert!(record.placement.is_none());
        assert_eq!(record.name, "demo");
        assert_eq!(factory.total_containers(), 0);
        assert!(!orch.keeper().is_tracked(project.id));

        let again = orch.stop(project.id).await.unwrap();
        assert!(again.is_already_stopped());
    }

    #[tokio::test]
    async fn stop_treats_missing_container_as_removed() {
        let (orch, factory, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Python3)
            .await
            .unwrap();
        let started = orch.start(project.id).await.unwrap().into_project();
        let placement = started.placement.unwrap();
        factory
            .mock(&placement.host)
            .forget_container(&placement.container_id);

        let outcome = orch.stop(project.id).await.unwrap();
        assert!(!outcome.is_already_stopped());
        assert!(!orch.get(project.id).await.unwrap().is_materialized());
    }

    #[tokio::test]
    async fn remove_failure_keeps_placement() {
        let (orch, _, _) =
            build_with(MockEngineFactory::with_client(&HOSTS, |_| {
                MockEngineClient::new().with_failing_remove()
            }));
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Python3)
            .await
            .unwrap();
        orch.start(project.id).await.unwrap();

        let err = orch.stop(project.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ContainerRemoveFailed { .. }));
        assert!(orch.get(project.id).await.unwrap().is_materialized());
        assert!(orch.keeper().is_tracked(project.id));
    }

    #[tokio::test]
    async fn destroy_stops_then_deletes() {
        let (orch, factory, mut rx) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        orch.start(project.id).await.unwrap();

        orch.destroy(project.id).await.unwrap();
        assert!(matches!(
            orch.get(project.id).await,
            Err(OrchestratorError::ProjectNotFound(_))
        ));
        assert_eq!(factory.total_containers(), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                ProjectEventKind::Reserved,
                ProjectEventKind::Started,
                ProjectEventKind::Stopped,
                ProjectEventKind::Destroyed,
            ]
        );

        let err = orch.destroy(project.id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn touch_refreshes_only_running_projects() {
        let (orch, _, _) = build();
        let project = orch
            .reserve(OwnerId::new(1), "demo", ImageKind::Java)
            .await
            .unwrap();
        assert!(!orch.touch(project.id).await.unwrap());
        orch.start(project.id).await.unwrap();
        assert!(orch.touch(project.id).await.unwrap());
        assert!(orch.touch(ProjectId::new(999)).await.is_err());
    }

    #[tokio::test]
    async fn list_for_owner_filters() {
        let (orch, _, _) = build();
        orch.reserve(OwnerId::new(1), "a", ImageKind::Java).await.unwrap();
        orch.reserve(OwnerId::new(2), "b", ImageKind::Java).await.unwrap();
        orch.reserve(OwnerId::new(1), "c", ImageKind::Cpp).await.unwrap();

        assert_eq!(orch.list().await.unwrap().len(), 3);
        let mine = orch.list_for_owner(OwnerId::new(1)).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|p| p.owner_id == OwnerId::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn reclaim_stops_idle_project() {
        let (orch, factory, mut rx) = build();
        let project = orch
            .reserve(OwnerId::new(1), "idle", ImageKind::Java)
            .await
            .unwrap();
        orch.start(project.id).await.unwrap();
        drain(&mut rx);

        assert_eq!(
            orch.reclaim(project.id).await.unwrap(),
            ReclaimOutcome::StillActive
        );

        tokio::time::advance(orch.config().idle_timeout() + Duration::from_secs(1)).await;
        assert_eq!(
            orch.reclaim(project.id).await.unwrap(),
            ReclaimOutcome::Reclaimed
        );
        assert_eq!(factory.total_containers(), 0);
        assert_eq!(orch.reclaims_completed(), 1);
        assert_eq!(drain(&mut rx), vec![ProjectEventKind::Reclaimed]);
        assert!(orch.stop(project.id).await.unwrap().is_already_stopped());
    }

    #[tokio::test]
    async fn adopt_running_tracks_materialized_projects() {
        let (orch, _, _) = build();
        let a = orch.reserve(OwnerId::new(1), "a", ImageKind::Java).await.unwrap();
        let b = orch.reserve(OwnerId::new(1), "b", ImageKind::Java).await.unwrap();
        orch.start(a.id).await.unwrap();
        orch.keeper().remove_keep(a.id);

        assert_eq!(orch.adopt_running().await.unwrap(), 1);
        assert!(orch.keeper().is_tracked(a.id));
        assert!(!orch.keeper().is_tracked(b.id));
    }

    #[tokio::test]
    async fn ping_hosts_reports_each_host() {
        let (orch, _, _) = build_with(MockEngineFactory::with_client(&HOSTS, |host| {
            if host == "10.0.0.2" {
                MockEngineClient::new().with_failing_ping()
            } else {
                MockEngineClient::new()
            }
        }));
        let report = orch.ping_hosts(Duration::from_secs(1)).await;
        assert_eq!(report.len(), 3);
        let down: Vec<_> = report.iter().filter(|h| !h.reachable).collect();
        assert_eq!(down.len(), 1);
        assert_eq!(down[0].host, "10.0.0.2");
        assert!(down[0].error.is_some());
    }

    #[test]
    fn build_requires_factory_and_store() {
        let result = ContainerOrchestratorBuilder::<MockEngineFactory, MemoryProjectStore>::new()
            .config(test_config())
            .build();
        assert!(matches!(result, Err(OrchestratorError::Config { .. })));
    }

    #[tokio::test]
    async fn external_event_sender_returns_no_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let (orch, none) = ContainerOrchestratorBuilder::new()
            .config(test_config())
            .factory(Arc::new(MockEngineFactory::new(&HOSTS)))
            .store(Arc::new(MemoryProjectStore::new()))
            .event_sender(tx)
            .build()
            .unwrap();
        assert!(none.is_none());
        orch.reserve(OwnerId::new(1), "x", ImageKind::Java).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, ProjectEventKind::Reserved);
    }
}

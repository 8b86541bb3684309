//! 프로비저닝 서비스: 오케스트레이터의 장기 실행 부분
//!
//! [`ProvisioningService`]는 [`Pipeline`]을 구현하여 데몬이 다른 서비스와 같은
//! 방식으로 시작, 정지, 헬스 체크할 수 있게 합니다.
//!
//! 시작 시:
//! 1. 저장소의 실행 중인 프로젝트를 유휴 추적 대상으로 등록
//! 2. 엔진 호스트 ping (실패는 경고만)
//! 3. 유휴 회수 스위퍼 태스크 스폰

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vslab_core::error::{PipelineError, VslabError};
use vslab_core::pipeline::{HealthStatus, Pipeline};
use vslab_core::protocol::HostHealth;

use crate::hosts::EngineClientFactory;
use crate::keeper::spawn_sweeper;
use crate::orchestrator::ContainerOrchestrator;
use crate::store::ProjectStore;

/// 헬스 체크의 호스트별 ping 기본 한도
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// 서비스 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// 초기화됨 (아직 시작 안 함)
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 호스트 ping 결과로 헬스 상태를 계산합니다.
///
/// 모두 도달 가능하면 Healthy, 일부만 가능하면 Degraded, 하나도 안 되면 Unhealthy.
pub fn health_from_hosts(hosts: &[HostHealth]) -> HealthStatus {
    let total = hosts.len();
    let down = hosts.iter().filter(|h| !h.reachable).count();
    if total == 0 {
        HealthStatus::Unhealthy("no engine hosts".to_owned())
    } else if down == 0 {
        HealthStatus::Healthy
    } else if down < total {
        HealthStatus::Degraded(format!("{down} of {total} hosts unreachable"))
    } else {
        HealthStatus::Unhealthy(format!("all {total} hosts unreachable"))
    }
}

/// 프로비저닝 서비스
pub struct ProvisioningService<F: EngineClientFactory, S: ProjectStore> {
    orchestrator: Arc<ContainerOrchestrator<F, S>>,
    state: ServiceState,
    shutdown: Option<CancellationToken>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    ping_timeout: Duration,
}

impl<F: EngineClientFactory, S: ProjectStore> ProvisioningService<F, S> {
    /// 오케스트레이터로 서비스를 생성합니다.
    pub fn new(orchestrator: Arc<ContainerOrchestrator<F, S>>) -> Self {
        Self {
            orchestrator,
            state: ServiceState::Initialized,
            shutdown: None,
            tasks: Vec::new(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// 호스트 ping 한도를 지정합니다.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// 공유 오케스트레이터
    pub fn orchestrator(&self) -> Arc<ContainerOrchestrator<F, S>> {
        Arc::clone(&self.orchestrator)
    }

    /// 현재 상태
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// 호스트별 도달 가능 여부
    pub async fn host_health(&self) -> Vec<HostHealth> {
        self.orchestrator.ping_hosts(self.ping_timeout).await
    }
}

impl<F: EngineClientFactory, S: ProjectStore> Pipeline for ProvisioningService<F, S> {
    async fn start(&mut self) -> Result<(), VslabError> {
        if self.state == ServiceState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!("starting provisioning service");

        // 1. 이전 실행에서 남은 컨테이너 추적
        let adopted = self
            .orchestrator
            .adopt_running()
            .await
            .map_err(|e| PipelineError::InitFailed(format!("failed to adopt projects: {e}")))?;

        // 2. 엔진 호스트 확인
        let hosts = self.host_health().await;
        for host in hosts.iter().filter(|h| !h.reachable) {
            warn!(
                host = %host.host,
                error = host.error.as_deref().unwrap_or("unknown"),
                "engine host not reachable at startup"
            );
        }

        // 3. 스위퍼 스폰
        let token = CancellationToken::new();
        let sweeper = spawn_sweeper(
            Arc::clone(self.orchestrator.keeper()),
            Arc::clone(&self.orchestrator),
            self.orchestrator.config().sweep_interval(),
            token.clone(),
        );
        self.tasks.push(sweeper);
        self.shutdown = Some(token);

        self.state = ServiceState::Running;
        info!(
            adopted = adopted,
            hosts = hosts.len(),
            reachable = hosts.iter().filter(|h| h.reachable).count(),
            "provisioning service started"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), VslabError> {
        if self.state != ServiceState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping provisioning service");

        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        self.state = ServiceState::Stopped;
        info!("provisioning service stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            ServiceState::Running => health_from_hosts(&self.host_health().await),
            ServiceState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServiceState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfigBuilder;
    use crate::engine::MockEngineClient;
    use crate::hosts::MockEngineFactory;
    use crate::orchestrator::ContainerOrchestratorBuilder;
    use crate::store::MemoryProjectStore;
    use vslab_core::types::{ImageKind, OwnerId};

    fn service_with(
        factory: MockEngineFactory,
    ) -> ProvisioningService<MockEngineFactory, MemoryProjectStore> {
        let config = OrchestratorConfigBuilder::new()
            .hosts(factory.registry().hosts().to_vec())
            .build()
            .unwrap();
        let (orch, _rx) = ContainerOrchestratorBuilder::new()
            .config(config)
            .factory(Arc::new(factory))
            .store(Arc::new(MemoryProjectStore::new()))
            .build()
            .unwrap();
        ProvisioningService::new(Arc::new(orch))
    }

    fn host(name: &str, reachable: bool) -> HostHealth {
        HostHealth {
            host: name.to_owned(),
            reachable,
            error: (!reachable).then(|| "refused".to_owned()),
        }
    }

    #[test]
    fn health_aggregation() {
        assert!(health_from_hosts(&[host("a", true), host("b", true)]).is_healthy());
        assert_eq!(
            health_from_hosts(&[host("a", true), host("b", false)]),
            HealthStatus::Degraded("1 of 2 hosts unreachable".to_owned())
        );
        assert!(health_from_hosts(&[host("a", false)]).is_unhealthy());
        assert!(health_from_hosts(&[]).is_unhealthy());
    }

    #[tokio::test]
    async fn lifecycle_start_stop() {
        let mut service = service_with(MockEngineFactory::new(&["h1", "h2"]));
        assert!(service.health_check().await.is_unhealthy());

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.health_check().await.is_healthy());
        assert!(matches!(
            service.start().await,
            Err(VslabError::Pipeline(PipelineError::AlreadyRunning))
        ));

        service.stop().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert!(matches!(
            service.stop().await,
            Err(VslabError::Pipeline(PipelineError::NotRunning))
        ));
    }

    #[tokio::test]
    async fn degraded_when_some_hosts_down() {
        let factory = MockEngineFactory::with_client(&["h1", "h2"], |h| {
            if h == "h2" {
                MockEngineClient::new().with_failing_ping()
            } else {
                MockEngineClient::new()
            }
        });
        let mut service = service_with(factory);
        service.start().await.unwrap();
        assert!(matches!(
            service.health_check().await,
            HealthStatus::Degraded(_)
        ));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn start_adopts_running_projects() {
        let mut service = service_with(MockEngineFactory::new(&["h1"]));
        let orch = service.orchestrator();
        let project = orch
            .reserve(OwnerId::new(1), "p", ImageKind::Java)
            .await
            .unwrap();
        orch.start(project.id).await.unwrap();
        orch.keeper().remove_keep(project.id);

        service.start().await.unwrap();
        assert!(orch.keeper().is_tracked(project.id));
        service.stop().await.unwrap();
    }
}

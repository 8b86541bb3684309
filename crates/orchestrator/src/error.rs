//! 오케스트레이터 에러 타입
//!
//! [`OrchestratorError`]는 프로젝트 생명주기 처리 중 발생하는 모든 에러를 표현합니다.
//! `From<OrchestratorError> for VslabError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//!
//! 엔진 작업은 성공했지만 기록이 따라가지 못한 경우(`PortDiscoveryTimeout`,
//! `PersistFailed`, `OrphanedRecord`)는 [`OrchestratorError::is_inconsistency`]로
//! 구분되어 운영자가 수동 정리 대상을 식별할 수 있습니다.

use vslab_core::error::{ConfigError, EngineError, StoreError, VslabError};
use vslab_core::types::ProjectId;

/// 오케스트레이터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// 저장소가 예약을 거부함
    #[error("reservation failed: {0}")]
    ReservationFailed(String),

    /// 프로젝트 레코드가 없음
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    /// 사용할 수 있는 엔진 호스트가 없음
    #[error("no engine hosts configured")]
    NoHosts,

    /// 엔진 호스트에 연결할 수 없음
    #[error("host '{host}' unreachable: {reason}")]
    HostUnreachable {
        /// 대상 호스트
        host: String,
        /// 실패 사유
        reason: String,
    },

    /// 컨테이너 생성 실패
    #[error("container create failed on '{host}': {reason}")]
    ContainerCreateFailed {
        /// 대상 호스트
        host: String,
        /// 실패 사유
        reason: String,
    },

    /// 컨테이너 시작 실패 (생성된 컨테이너는 정리를 시도함)
    #[error("container '{container_id}' start failed on '{host}': {reason}")]
    ContainerStartFailed {
        /// 대상 호스트
        host: String,
        /// 컨테이너 ID
        container_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 컨테이너 제거 실패
    #[error("container '{container_id}' remove failed on '{host}': {reason}")]
    ContainerRemoveFailed {
        /// 대상 호스트
        host: String,
        /// 컨테이너 ID
        container_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 한도 내에 공개 포트를 찾지 못함 (컨테이너는 호스트에 남아 있음)
    #[error(
        "port discovery for container '{container_id}' on '{host}' gave up after {attempts} attempts"
    )]
    PortDiscoveryTimeout {
        /// 대상 호스트
        host: String,
        /// 남겨진 컨테이너 ID
        container_id: String,
        /// 조회 횟수
        attempts: u32,
    },

    /// 엔진 작업 후 기록 갱신 실패
    #[error("failed to persist project {project_id} after engine change: {reason}")]
    PersistFailed {
        /// 대상 프로젝트
        project_id: ProjectId,
        /// 실패 사유
        reason: String,
    },

    /// 정지 후 레코드 삭제 실패
    #[error("project {project_id} stopped but its record could not be deleted: {reason}")]
    OrphanedRecord {
        /// 대상 프로젝트
        project_id: ProjectId,
        /// 실패 사유
        reason: String,
    },

    /// 저장소 접근 실패
    #[error("store error: {0}")]
    Store(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl OrchestratorError {
    /// 엔진 상태와 기록이 어긋났을 수 있는 에러인지 확인합니다.
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::PortDiscoveryTimeout { .. } | Self::PersistFailed { .. } | Self::OrphanedRecord { .. }
        )
    }

    /// 메트릭 레이블과 제어 응답에 쓰는 고정된 에러 종류명
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReservationFailed(_) => "reservation_failed",
            Self::ProjectNotFound(_) => "project_not_found",
            Self::NoHosts => "no_hosts",
            Self::HostUnreachable { .. } => "host_unreachable",
            Self::ContainerCreateFailed { .. } => "container_create_failed",
            Self::ContainerStartFailed { .. } => "container_start_failed",
            Self::ContainerRemoveFailed { .. } => "container_remove_failed",
            Self::PortDiscoveryTimeout { .. } => "port_discovery_timeout",
            Self::PersistFailed { .. } => "persist_failed",
            Self::OrphanedRecord { .. } => "orphaned_record",
            Self::Store(_) => "store",
            Self::Config { .. } => "config",
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::ProjectNotFound(id),
            StoreError::Unavailable(reason) => Self::Store(reason),
        }
    }
}

impl From<OrchestratorError> for VslabError {
    fn from(err: OrchestratorError) -> Self {
        match &err {
            OrchestratorError::ProjectNotFound(id) => VslabError::Store(StoreError::NotFound(*id)),
            OrchestratorError::ReservationFailed(_)
            | OrchestratorError::Store(_)
            | OrchestratorError::PersistFailed { .. }
            | OrchestratorError::OrphanedRecord { .. } => {
                VslabError::Store(StoreError::Unavailable(err.to_string()))
            }
            OrchestratorError::HostUnreachable { host, reason } => {
                VslabError::Engine(EngineError::HostUnreachable {
                    host: host.clone(),
                    reason: reason.clone(),
                })
            }
            OrchestratorError::NoHosts
            | OrchestratorError::ContainerCreateFailed { .. }
            | OrchestratorError::ContainerStartFailed { .. }
            | OrchestratorError::ContainerRemoveFailed { .. }
            | OrchestratorError::PortDiscoveryTimeout { .. } => {
                VslabError::Engine(EngineError::Api(err.to_string()))
            }
            OrchestratorError::Config { field, reason } => {
                VslabError::Config(ConfigError::InvalidValue {
                    field: field.clone(),
                    reason: reason.clone(),
                })
            }
        }
    }
}

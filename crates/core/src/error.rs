//! 에러 타입: 도메인별 에러 정의

use crate::types::ProjectId;

/// vslab 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum VslabError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인(서비스 생명주기) 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 프로젝트 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// 컨테이너 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,

    /// 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),
}

/// 프로젝트 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 프로젝트 레코드가 존재하지 않음
    #[error("project {0} not found")]
    NotFound(ProjectId),

    /// 저장소에 접근할 수 없음 (I/O, 직렬화, 연결 실패 등)
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// 컨테이너 엔진 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 엔진 호스트에 연결할 수 없음
    #[error("host '{host}' unreachable: {reason}")]
    HostUnreachable { host: String, reason: String },

    /// 엔진이 해당 컨테이너를 알지 못함 (404)
    #[error("container '{0}' not found on engine")]
    ContainerNotFound(String),

    /// 엔진 API 호출 실패
    #[error("engine api error: {0}")]
    Api(String),
}

//! vslab 공통 크레이트
//!
//! 프로젝트 도메인 타입, 에러, 설정, 서비스 생명주기 trait, 메트릭 이름,
//! 제어 소켓 프로토콜을 정의합니다. 오케스트레이터, 데몬, CLI가 모두 의존합니다.

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod protocol;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, EngineError, PipelineError, StoreError, VslabError};

// 설정
pub use config::VslabConfig;

// 이벤트
pub use event::{EventMetadata, ProjectEvent, ProjectEventKind};

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};

// 제어 프로토콜
pub use protocol::{ControlRequest, ControlResponse, HostHealth};

// 도메인 타입
pub use types::{ImageKind, NewProject, OwnerId, Placement, Project, ProjectId, PublishedPorts};

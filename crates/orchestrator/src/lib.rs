//! vslab 컨테이너 오케스트레이션 코어
//!
//! 사용자별 샌드박스 프로젝트를 예약하고, 엔진 호스트 풀에 컨테이너를 띄우고,
//! 엔진이 고른 포트를 발견해 기록하며, 유휴 프로젝트를 회수합니다.
//!
//! # Module Structure
//!
//! - [`error`]: 도메인 에러 (`OrchestratorError`)
//! - [`config`]: 오케스트레이터 설정 (`OrchestratorConfig`, builder)
//! - [`engine`]: 엔진 API 추상화 (`EngineClient` trait, `BollardEngineClient`)
//! - [`hosts`]: 호스트 풀과 클라이언트 팩토리 (`HostRegistry`, `EngineClientFactory`)
//! - [`plan`]: 공개 포트와 메모리 상한 (`PortPlan`)
//! - [`ports`]: 포트 매핑 해석과 제한된 재시도 발견 (`PortDiscovery`)
//! - [`store`]: 프로젝트 레코드 저장소 (`ProjectStore`, 메모리/파일 구현)
//! - [`locks`]: 프로젝트별 비동기 잠금 (`ProjectLocks`)
//! - [`keeper`]: 유휴 추적과 주기적 회수 (`LivenessKeeper`, `Reclaimer`)
//! - [`orchestrator`]: 생명주기 상태 기계 (`ContainerOrchestrator`, builder)
//! - [`service`]: 데몬용 `Pipeline` 구현 (`ProvisioningService`)
//!
//! # Architecture
//!
//! ```text
//! control request ──▶ ContainerOrchestrator ──▶ ProjectLocks (per project)
//!                          │        │
//!                          │        ├──▶ HostRegistry.select_random()
//!                          │        ├──▶ EngineClientFactory.client(host) ──▶ engine API
//!                          │        ├──▶ PortDiscovery.discover()
//!                          │        └──▶ ProjectStore.update()
//!                          │
//!                          └──▶ LivenessKeeper ◀── sweeper task ──▶ Reclaimer::reclaim()
//!
//! ProjectEvent --mpsc--> daemon
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod hosts;
pub mod keeper;
pub mod locks;
pub mod orchestrator;
pub mod plan;
pub mod ports;
pub mod service;
pub mod store;

// --- Public API Re-exports ---

// Orchestrator
pub use orchestrator::{
    ContainerOrchestrator, ContainerOrchestratorBuilder, StartOutcome, StopOutcome,
};

// Service
pub use service::{ProvisioningService, ServiceState, health_from_hosts};

// Configuration
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};

// Error
pub use error::OrchestratorError;

// Engine API
pub use engine::{BollardEngineClient, ContainerSpec, EngineClient};

// Hosts
pub use hosts::{BollardEngineFactory, EngineClientFactory, HostRegistry};

// Ports
pub use plan::PortPlan;
pub use ports::{PortDiscovery, PortMapping, parse_port_lines};

// Store
pub use store::{ConfiguredStore, FileProjectStore, MemoryProjectStore, ProjectStore};

// Keeper
pub use keeper::{LivenessKeeper, ReclaimOutcome, Reclaimer, SweepReport};

// Locks
pub use locks::{ProjectLockGuard, ProjectLocks};

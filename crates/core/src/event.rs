//! 이벤트 시스템: 프로젝트 생명주기 알림
//!
//! 오케스트레이터는 상태가 바뀔 때마다 [`ProjectEvent`]를 발행합니다.
//! 수신 측(데몬 로깅 등)이 느려도 오케스트레이터는 절대 기다리지 않으며,
//! 채널이 가득 차면 이벤트는 버려집니다.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::types::{Project, ProjectId};

/// 오케스트레이터 모듈명
pub const MODULE_ORCHESTRATOR: &str = "orchestrator";
/// 유휴 회수 모듈명
pub const MODULE_KEEPER: &str = "keeper";

/// 이벤트 메타데이터: 모든 이벤트에 공통으로 포함되는 추적 정보
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// 이벤트 발생 시각
    pub timestamp: SystemTime,
    /// 이벤트를 생성한 모듈명
    pub source_module: String,
    /// 추적 ID: 같은 요청에서 나온 이벤트를 연결합니다
    pub trace_id: String,
}

impl EventMetadata {
    /// 기존 trace_id를 사용하여 새 메타데이터를 생성합니다.
    pub fn new(source_module: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now(),
            source_module: source_module.into(),
            trace_id: trace_id.into(),
        }
    }

    /// 새로운 UUID v4 trace_id를 생성하여 메타데이터를 만듭니다.
    pub fn with_new_trace(source_module: impl Into<String>) -> Self {
        Self::new(source_module, uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] source={} trace={}",
            unix_timestamp_str(self.timestamp),
            self.source_module,
            self.trace_id,
        )
    }
}

/// 프로젝트 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectEventKind {
    /// 예약됨 (컨테이너 없음)
    Reserved,
    /// 컨테이너가 기동되어 배치가 기록됨
    Started,
    /// 명시적 정지 요청으로 컨테이너가 제거됨
    Stopped,
    /// 프로젝트 레코드가 삭제됨
    Destroyed,
    /// 유휴 시간 초과로 컨테이너가 회수됨
    Reclaimed,
    /// 엔진 상태와 기록이 어긋남
    Inconsistent,
}

impl fmt::Display for ProjectEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reserved => "reserved",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
            Self::Reclaimed => "reclaimed",
            Self::Inconsistent => "inconsistent",
        };
        f.write_str(s)
    }
}

/// 프로젝트 생명주기 이벤트
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEvent {
    /// 이벤트 고유 ID (UUID v4)
    pub id: String,
    /// 이벤트 메타데이터
    pub metadata: EventMetadata,
    /// 이벤트 종류
    pub kind: ProjectEventKind,
    /// 대상 프로젝트 ID
    pub project_id: ProjectId,
    /// 이벤트 시점의 프로젝트 스냅샷 (파기 후에는 없음)
    pub project: Option<Project>,
    /// 부가 설명 (불일치 사유 등)
    pub detail: Option<String>,
}

impl ProjectEvent {
    /// 새 trace로 이벤트를 생성합니다.
    pub fn new(kind: ProjectEventKind, project_id: ProjectId, source_module: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            metadata: EventMetadata::with_new_trace(source_module),
            kind,
            project_id,
            project: None,
            detail: None,
        }
    }

    /// 프로젝트 스냅샷을 붙입니다.
    pub fn with_project(mut self, project: Project) -> Self {
        self.project = Some(project);
        self
    }

    /// 부가 설명을 붙입니다.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for ProjectEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} project={} {}", self.kind, self.project_id, self.metadata)?;
        if let Some(detail) = &self.detail {
            write!(f, " detail={detail}")?;
        }
        Ok(())
    }
}

fn unix_timestamp_str(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => format!("{}", duration.as_secs()),
        Err(_) => "unknown".to_owned(),
    }
}

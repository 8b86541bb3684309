//! 제어 소켓 프로토콜: 데몬과 클라이언트가 주고받는 메시지
//!
//! 한 줄에 JSON 객체 하나(newline-delimited JSON)를 보내고, 요청마다
//! 정확히 하나의 응답 줄을 받습니다.
//!
//! ```text
//! → {"op":"start","project_id":7,"owner_id":3}
//! ← {"status":"started","project":{...},"already_running":false}
//! ```

use serde::{Deserialize, Serialize};

use crate::pipeline::HealthStatus;
use crate::types::{ImageKind, OwnerId, Project, ProjectId};

/// 요청 소유자와 레코드 소유자가 다를 때의 에러 종류
pub const ERROR_KIND_FORBIDDEN: &str = "forbidden";
/// 해석할 수 없는 요청 줄의 에러 종류
pub const ERROR_KIND_BAD_REQUEST: &str = "bad_request";
/// 최대 크기를 넘은 요청 줄의 에러 종류
pub const ERROR_KIND_REQUEST_TOO_LARGE: &str = "request_too_large";

/// 제어 요청
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// 새 프로젝트 예약 (컨테이너 없음)
    Reserve {
        owner_id: OwnerId,
        name: String,
        image_kind: ImageKind,
    },
    /// 컨테이너 기동
    Start {
        project_id: ProjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 컨테이너 정지 (레코드 유지)
    Stop {
        project_id: ProjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 정지 후 레코드 삭제
    Destroy {
        project_id: ProjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 레코드 조회
    Get {
        project_id: ProjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 사용자 활동 신호
    Touch {
        project_id: ProjectId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 레코드 목록 (소유자 필터 선택)
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner_id: Option<OwnerId>,
    },
    /// 서비스 헬스 조회
    Health,
}

impl ControlRequest {
    /// 메트릭 레이블과 로그에 쓰는 요청 이름
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Reserve { .. } => "reserve",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Destroy { .. } => "destroy",
            Self::Get { .. } => "get",
            Self::Touch { .. } => "touch",
            Self::List { .. } => "list",
            Self::Health => "health",
        }
    }

    /// 특정 프로젝트를 대상으로 하는 요청이면 (프로젝트 ID, 요청 소유자)를 반환합니다.
    pub fn target(&self) -> Option<(ProjectId, Option<OwnerId>)> {
        match self {
            Self::Start {
                project_id,
                owner_id,
            }
            | Self::Stop {
                project_id,
                owner_id,
            }
            | Self::Destroy {
                project_id,
                owner_id,
            }
            | Self::Get {
                project_id,
                owner_id,
            }
            | Self::Touch {
                project_id,
                owner_id,
            } => Some((*project_id, *owner_id)),
            Self::Reserve { .. } | Self::List { .. } | Self::Health => None,
        }
    }
}

/// 호스트별 도달 가능 여부
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHealth {
    /// 엔진 호스트 주소
    pub host: String,
    /// ping 성공 여부
    pub reachable: bool,
    /// 실패 사유
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 제어 응답
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ControlResponse {
    /// 단일 프로젝트 (reserve, get)
    Project { project: Project },
    /// 프로젝트 목록
    Projects { projects: Vec<Project> },
    /// 기동 결과
    Started {
        project: Project,
        already_running: bool,
    },
    /// 정지 결과
    Stopped {
        project: Project,
        already_stopped: bool,
    },
    /// 파기 완료
    Destroyed { project_id: ProjectId },
    /// 활동 신호 반영 완료
    Touched { project_id: ProjectId },
    /// 헬스 상태
    Health {
        overall: HealthStatus,
        tracked_projects: usize,
        hosts: Vec<HostHealth>,
    },
    /// 요청 실패
    Error {
        kind: String,
        message: String,
        inconsistent: bool,
    },
}

impl ControlResponse {
    /// 에러 응답을 만듭니다.
    pub fn error(kind: impl Into<String>, message: impl Into<String>, inconsistent: bool) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
            inconsistent,
        }
    }

    /// 에러 응답인지 확인합니다.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// 메시지를 개행으로 끝나는 JSON 한 줄로 직렬화합니다.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 프로젝트(사용자별 샌드박스 세션)와 그 물리적 배치 정보를 정의합니다.
//! 오케스트레이터, 데몬, CLI가 이 타입들을 사용하여 데이터를 교환합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 공유 기본 이미지명 (PYTHON2, PYTHON3, JAVA)
pub const BASE_IMAGE: &str = "vlab-base";

/// C++ 컴파일러 전용 이미지명
pub const CPP_IMAGE: &str = "vlab-cpp";

/// 엔진이 돌려주는 컨테이너 ID 중 기록에 사용하는 접두사 길이
pub const SHORT_CONTAINER_ID_LEN: usize = 12;

/// 프로젝트 ID: 저장소가 예약 시점에 할당합니다.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ProjectId(u64);

impl ProjectId {
    /// 원시 값으로 ID를 생성합니다.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 원시 값을 반환합니다.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProjectId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

/// 프로젝트 소유자(사용자) ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(u64);

impl OwnerId {
    /// 원시 값으로 ID를 생성합니다.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 원시 값을 반환합니다.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 프로젝트 이미지 종류
///
/// 닫힌 집합이며 각 종류는 정확히 하나의 이미지명에 대응합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageKind {
    /// Python 2
    Python2,
    /// Python 3
    Python3,
    /// C++ (전용 컴파일러 이미지)
    Cpp,
    /// Java
    Java,
}

impl ImageKind {
    /// 모든 이미지 종류
    pub const ALL: [ImageKind; 4] = [Self::Python2, Self::Python3, Self::Cpp, Self::Java];

    /// 컨테이너 생성에 사용할 이미지명을 반환합니다.
    pub fn image_name(self) -> &'static str {
        match self {
            Self::Cpp => CPP_IMAGE,
            Self::Python2 | Self::Python3 | Self::Java => BASE_IMAGE,
        }
    }

    /// 직렬화 형식과 동일한 이름을 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python2 => "PYTHON2",
            Self::Python3 => "PYTHON3",
            Self::Cpp => "CPP",
            Self::Java => "JAVA",
        }
    }

    /// 문자열에서 이미지 종류를 파싱합니다.
    ///
    /// 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PYTHON2" | "PY2" => Some(Self::Python2),
            "PYTHON3" | "PY3" | "PYTHON" => Some(Self::Python3),
            "CPP" | "C++" => Some(Self::Cpp),
            "JAVA" => Some(Self::Java),
            _ => None,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 컨테이너 내부 포트에 바인딩된 호스트 측 포트 3종
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPorts {
    /// 애플리케이션 서버 포트
    pub server_port: u16,
    /// 터미널 포트
    pub terminal_port: u16,
    /// 언어 서버 포트
    pub language_port: u16,
}

impl PublishedPorts {
    /// 세 포트가 모두 0이 아니고 서로 다른지 확인합니다.
    pub fn is_well_formed(&self) -> bool {
        let ports = [self.server_port, self.terminal_port, self.language_port];
        ports.iter().all(|p| *p != 0)
            && ports[0] != ports[1]
            && ports[1] != ports[2]
            && ports[0] != ports[2]
    }
}

/// 실체화된 프로젝트의 물리적 배치
///
/// 호스트와 컨테이너 ID, 포트는 항상 함께 기록되고 함께 지워집니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// 컨테이너를 실행 중인 엔진 호스트 주소
    pub host: String,
    /// 엔진이 할당한 컨테이너 ID (앞 12자)
    pub container_id: String,
    /// 발견된 호스트 포트
    pub ports: PublishedPorts,
}

/// 프로젝트 레코드
///
/// `placement`가 `None`이면 예약만 된 상태(컨테이너 없음)입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// 프로젝트 ID
    pub id: ProjectId,
    /// 소유자 ID
    pub owner_id: OwnerId,
    /// 표시 이름
    pub name: String,
    /// 이미지 종류 (생성 후 불변)
    pub image_kind: ImageKind,
    /// 물리적 배치 (없으면 미실체화)
    #[serde(default)]
    pub placement: Option<Placement>,
}

impl Project {
    /// 컨테이너가 실체화되어 있는지 확인합니다.
    pub fn is_materialized(&self) -> bool {
        self.placement.is_some()
    }

    /// 컨테이너를 실행 중인 호스트 주소를 반환합니다.
    pub fn host(&self) -> Option<&str> {
        self.placement.as_ref().map(|p| p.host.as_str())
    }

    /// 컨테이너 ID를 반환합니다.
    pub fn container_id(&self) -> Option<&str> {
        self.placement.as_ref().map(|p| p.container_id.as_str())
    }

    /// 발견된 포트를 반환합니다. 미실체화 상태에서는 `None`입니다.
    pub fn ports(&self) -> Option<PublishedPorts> {
        self.placement.as_ref().map(|p| p.ports)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.placement {
            Some(p) => write!(
                f,
                "project {} '{}' [{}] on {} ({})",
                self.id, self.name, self.image_kind, p.host, p.container_id
            ),
            None => write!(
                f,
                "project {} '{}' [{}] (not running)",
                self.id, self.name, self.image_kind
            ),
        }
    }
}

/// 예약 요청: 저장소가 ID를 할당하기 전의 프로젝트
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    /// 소유자 ID
    pub owner_id: OwnerId,
    /// 표시 이름
    pub name: String,
    /// 이미지 종류
    pub image_kind: ImageKind,
}

impl NewProject {
    /// 할당된 ID로 미실체화 프로젝트 레코드를 만듭니다.
    pub fn into_project(self, id: ProjectId) -> Project {
        Project {
            id,
            owner_id: self.owner_id,
            name: self.name,
            image_kind: self.image_kind,
            placement: None,
        }
    }
}

/// 엔진의 전체 컨테이너 ID에서 기록용 짧은 ID를 만듭니다.
pub fn short_container_id(full_id: &str) -> &str {
    match full_id.char_indices().nth(SHORT_CONTAINER_ID_LEN) {
        Some((idx, _)) => &full_id[..idx],
        None => full_id,
    }
}

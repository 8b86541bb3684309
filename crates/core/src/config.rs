//! 설정 관리: vslab.toml 파싱 및 런타임 설정
//!
//! [`VslabConfig`]는 모든 구성 요소의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`VSLAB_HOSTS_ADDRESSES=10.0.0.1,10.0.0.2` 형식)
//! 3. 설정 파일 (`vslab.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), vslab_core::error::VslabError> {
//! use vslab_core::config::VslabConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = VslabConfig::load("vslab.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = VslabConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VslabError};

/// vslab 통합 설정
///
/// `vslab.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 구성 요소는 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VslabConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 컨테이너 엔진 호스트 풀
    #[serde(default)]
    pub hosts: HostsConfig,
    /// 공개 포트 및 자원 상한
    #[serde(default)]
    pub ports: PortsConfig,
    /// 포트 발견 재시도 정책
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// 유휴 컨테이너 회수 정책
    #[serde(default)]
    pub keeper: KeeperConfig,
    /// 프로젝트 저장소
    #[serde(default)]
    pub store: StoreConfig,
    /// 제어 소켓
    #[serde(default)]
    pub control: ControlConfig,
    /// 메트릭 엔드포인트
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl VslabConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, VslabError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음, 검증 없음).
    ///
    /// 검증은 오버라이드를 모두 적용한 뒤 호출자가 수행합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, VslabError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VslabError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                VslabError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, VslabError> {
        toml::from_str(toml_str).map_err(|e| {
            VslabError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `VSLAB_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "VSLAB_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "VSLAB_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "VSLAB_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "VSLAB_GENERAL_PID_FILE");

        // Hosts
        override_csv(&mut self.hosts.addresses, "VSLAB_HOSTS_ADDRESSES");
        override_u16(&mut self.hosts.engine_port, "VSLAB_HOSTS_ENGINE_PORT");
        override_u64(
            &mut self.hosts.connect_timeout_secs,
            "VSLAB_HOSTS_CONNECT_TIMEOUT_SECS",
        );

        // Ports
        override_u16(&mut self.ports.server_port, "VSLAB_PORTS_SERVER_PORT");
        override_u16(&mut self.ports.terminal_port, "VSLAB_PORTS_TERMINAL_PORT");
        override_u16(&mut self.ports.language_port, "VSLAB_PORTS_LANGUAGE_PORT");
        override_u64(
            &mut self.ports.memory_limit_mib,
            "VSLAB_PORTS_MEMORY_LIMIT_MIB",
        );

        // Discovery
        override_u64(
            &mut self.discovery.retry_interval_ms,
            "VSLAB_DISCOVERY_RETRY_INTERVAL_MS",
        );
        override_u32(
            &mut self.discovery.max_attempts,
            "VSLAB_DISCOVERY_MAX_ATTEMPTS",
        );

        // Keeper
        override_u64(
            &mut self.keeper.idle_timeout_secs,
            "VSLAB_KEEPER_IDLE_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.keeper.sweep_interval_secs,
            "VSLAB_KEEPER_SWEEP_INTERVAL_SECS",
        );

        // Store
        override_string(&mut self.store.backend, "VSLAB_STORE_BACKEND");
        override_string(&mut self.store.path, "VSLAB_STORE_PATH");

        // Control
        override_string(&mut self.control.socket_path, "VSLAB_CONTROL_SOCKET_PATH");
        override_usize(
            &mut self.control.max_connections,
            "VSLAB_CONTROL_MAX_CONNECTIONS",
        );
        override_usize(
            &mut self.control.max_request_bytes,
            "VSLAB_CONTROL_MAX_REQUEST_BYTES",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "VSLAB_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "VSLAB_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "VSLAB_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), VslabError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        // 호스트 풀 검증
        if self.hosts.addresses.is_empty() {
            return Err(invalid(
                "hosts.addresses",
                "at least one engine host is required".to_owned(),
            ));
        }
        let mut seen = HashSet::new();
        for address in &self.hosts.addresses {
            if address.trim().is_empty() {
                return Err(invalid(
                    "hosts.addresses",
                    "host address must not be empty".to_owned(),
                ));
            }
            if !seen.insert(address.as_str()) {
                return Err(invalid(
                    "hosts.addresses",
                    format!("duplicate host address '{address}'"),
                ));
            }
        }
        if self.hosts.engine_port == 0 {
            return Err(invalid("hosts.engine_port", "must not be 0".to_owned()));
        }

        // 포트 계획 검증
        let ports = [
            ("ports.server_port", self.ports.server_port),
            ("ports.terminal_port", self.ports.terminal_port),
            ("ports.language_port", self.ports.language_port),
        ];
        for (field, port) in ports {
            if port == 0 {
                return Err(invalid(field, "must not be 0".to_owned()));
            }
        }
        if self.ports.server_port == self.ports.terminal_port
            || self.ports.terminal_port == self.ports.language_port
            || self.ports.server_port == self.ports.language_port
        {
            return Err(invalid(
                "ports",
                "server, terminal and language ports must be distinct".to_owned(),
            ));
        }
        if self.ports.memory_limit_mib == 0 {
            return Err(invalid(
                "ports.memory_limit_mib",
                "must be greater than 0".to_owned(),
            ));
        }

        // 포트 발견 검증
        if self.discovery.max_attempts == 0 {
            return Err(invalid(
                "discovery.max_attempts",
                "must be greater than 0".to_owned(),
            ));
        }

        // keeper 검증
        if self.keeper.idle_timeout_secs == 0 {
            return Err(invalid(
                "keeper.idle_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.keeper.sweep_interval_secs == 0 {
            return Err(invalid(
                "keeper.sweep_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        // 저장소 검증
        let valid_backends = ["file", "memory"];
        if !valid_backends.contains(&self.store.backend.as_str()) {
            return Err(invalid(
                "store.backend",
                format!("must be one of: {}", valid_backends.join(", ")),
            ));
        }
        if self.store.backend == "file" && self.store.path.is_empty() {
            return Err(invalid(
                "store.path",
                "path must not be empty for the file backend".to_owned(),
            ));
        }

        // 제어 소켓 검증
        if self.control.socket_path.is_empty() {
            return Err(invalid(
                "control.socket_path",
                "must not be empty".to_owned(),
            ));
        }
        if self.control.max_connections == 0 {
            return Err(invalid(
                "control.max_connections",
                "must be greater than 0".to_owned(),
            ));
        }
        if self.control.max_request_bytes < 64 {
            return Err(invalid(
                "control.max_request_bytes",
                "must be at least 64".to_owned(),
            ));
        }

        // 메트릭 검증
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must not be 0".to_owned()));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> VslabError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/vslab".to_owned(),
            pid_file: "/var/run/vslab.pid".to_owned(),
        }
    }
}

/// 컨테이너 엔진 호스트 풀 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostsConfig {
    /// 엔진 호스트 주소 목록
    pub addresses: Vec<String>,
    /// 엔진 원격 API 포트
    pub engine_port: u16,
    /// 엔진 연결 타임아웃 (초)
    pub connect_timeout_secs: u64,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1".to_owned()],
            engine_port: 2376,
            connect_timeout_secs: 120,
        }
    }
}

/// 공개 포트 및 메모리 상한 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// 컨테이너 내부 애플리케이션 서버 포트
    pub server_port: u16,
    /// 컨테이너 내부 터미널 포트
    pub terminal_port: u16,
    /// 컨테이너 내부 언어 서버 포트
    pub language_port: u16,
    /// 컨테이너당 메모리 상한 (MiB)
    pub memory_limit_mib: u64,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            server_port: 3000,
            terminal_port: 4000,
            language_port: 5000,
            memory_limit_mib: 300,
        }
    }
}

/// 포트 발견 재시도 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// 재시도 간격 (밀리초)
    pub retry_interval_ms: u64,
    /// 최대 조회 횟수
    pub max_attempts: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            max_attempts: 30,
        }
    }
}

/// 유휴 회수 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// 마지막 활동 이후 회수까지의 유휴 시간 (초)
    pub idle_timeout_secs: u64,
    /// 유휴 검사 주기 (초)
    pub sweep_interval_secs: u64,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

/// 프로젝트 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 저장소 백엔드 (file, memory)
    pub backend: String,
    /// 파일 백엔드 경로
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "file".to_owned(),
            path: "/var/lib/vslab/projects.json".to_owned(),
        }
    }
}

/// 제어 소켓 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Unix 도메인 소켓 경로
    pub socket_path: String,
    /// 최대 동시 연결 수
    pub max_connections: usize,
    /// 요청 한 줄의 최대 크기 (바이트)
    pub max_request_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/vslab/control.sock".to_owned(),
            max_connections: 64,
            max_request_bytes: 64 * 1024,
        }
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

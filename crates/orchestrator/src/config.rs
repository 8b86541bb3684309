//! 오케스트레이터 설정
//!
//! [`OrchestratorConfig`]는 core의 [`VslabConfig`]에서 오케스트레이터가 읽는 섹션
//! (`hosts`, `ports`, `discovery`, `keeper`)만 모아 만든 불변 설정 값입니다.
//! 검증된 후 오케스트레이터에 통째로 전달되며 실행 중에는 바뀌지 않습니다.
//!
//! # 사용 예시
//! ```ignore
//! use vslab_core::config::VslabConfig;
//! use vslab_orchestrator::config::OrchestratorConfig;
//!
//! let core_config = VslabConfig::default();
//! let config = OrchestratorConfig::from_core(&core_config);
//! config.validate()?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use vslab_core::config::VslabConfig;

use crate::error::OrchestratorError;
use crate::plan::PortPlan;

/// 오케스트레이터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// 엔진 호스트 주소 목록
    pub hosts: Vec<String>,
    /// 엔진 원격 API 포트
    pub engine_port: u16,
    /// 엔진 연결 타임아웃 (초)
    pub connect_timeout_secs: u64,
    /// 애플리케이션 서버 포트 (컨테이너 내부)
    pub server_port: u16,
    /// 터미널 포트 (컨테이너 내부)
    pub terminal_port: u16,
    /// 언어 서버 포트 (컨테이너 내부)
    pub language_port: u16,
    /// 컨테이너 메모리 상한 (MiB)
    pub memory_limit_mib: u64,
    /// 포트 발견 재시도 간격 (밀리초)
    pub discovery_interval_ms: u64,
    /// 포트 발견 최대 조회 횟수
    pub discovery_max_attempts: u32,
    /// 유휴 회수 기준 시간 (초)
    pub idle_timeout_secs: u64,
    /// 유휴 검사 주기 (초)
    pub sweep_interval_secs: u64,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 이벤트 채널 용량
    pub event_channel_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1".to_owned()],
            engine_port: 2376,
            connect_timeout_secs: 120,
            server_port: 3000,
            terminal_port: 4000,
            language_port: 5000,
            memory_limit_mib: 300,
            discovery_interval_ms: 1000,
            discovery_max_attempts: 30,
            idle_timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
            event_channel_capacity: 256,
        }
    }
}

/// 설정 상한값 상수
const MAX_CONNECT_TIMEOUT_SECS: u64 = 600;
const MAX_DISCOVERY_INTERVAL_MS: u64 = 60_000;
const MAX_DISCOVERY_ATTEMPTS: u32 = 600;
const MAX_MEMORY_LIMIT_MIB: u64 = 64 * 1024;
const MAX_SWEEP_INTERVAL_SECS: u64 = 3600;
const MAX_EVENT_CHANNEL_CAPACITY: usize = 65_536;

impl OrchestratorConfig {
    /// core 설정에서 오케스트레이터 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &VslabConfig) -> Self {
        Self {
            hosts: core.hosts.addresses.clone(),
            engine_port: core.hosts.engine_port,
            connect_timeout_secs: core.hosts.connect_timeout_secs,
            server_port: core.ports.server_port,
            terminal_port: core.ports.terminal_port,
            language_port: core.ports.language_port,
            memory_limit_mib: core.ports.memory_limit_mib,
            discovery_interval_ms: core.discovery.retry_interval_ms,
            discovery_max_attempts: core.discovery.max_attempts,
            idle_timeout_secs: core.keeper.idle_timeout_secs,
            sweep_interval_secs: core.keeper.sweep_interval_secs,
            ..Self::default()
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(OrchestratorError::NoHosts);
        }

        if self.engine_port == 0 {
            return Err(config_error("engine_port", "must not be 0".to_owned()));
        }

        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > MAX_CONNECT_TIMEOUT_SECS {
            return Err(config_error(
                "connect_timeout_secs",
                format!("must be 1-{MAX_CONNECT_TIMEOUT_SECS}"),
            ));
        }

        if self.memory_limit_mib > MAX_MEMORY_LIMIT_MIB {
            return Err(config_error(
                "memory_limit_mib",
                format!("must be at most {MAX_MEMORY_LIMIT_MIB}"),
            ));
        }

        // 포트 조합 검증은 PortPlan이 담당
        self.port_plan()?;

        if self.discovery_interval_ms > MAX_DISCOVERY_INTERVAL_MS {
            return Err(config_error(
                "discovery_interval_ms",
                format!("must be 0-{MAX_DISCOVERY_INTERVAL_MS}"),
            ));
        }

        if self.discovery_max_attempts == 0 || self.discovery_max_attempts > MAX_DISCOVERY_ATTEMPTS
        {
            return Err(config_error(
                "discovery_max_attempts",
                format!("must be 1-{MAX_DISCOVERY_ATTEMPTS}"),
            ));
        }

        if self.idle_timeout_secs == 0 {
            return Err(config_error(
                "idle_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.sweep_interval_secs == 0 || self.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(config_error(
                "sweep_interval_secs",
                format!("must be 1-{MAX_SWEEP_INTERVAL_SECS}"),
            ));
        }

        if self.event_channel_capacity == 0
            || self.event_channel_capacity > MAX_EVENT_CHANNEL_CAPACITY
        {
            return Err(config_error(
                "event_channel_capacity",
                format!("must be 1-{MAX_EVENT_CHANNEL_CAPACITY}"),
            ));
        }

        Ok(())
    }

    /// 설정에서 포트 계획을 만듭니다.
    pub fn port_plan(&self) -> Result<PortPlan, OrchestratorError> {
        PortPlan::new(
            self.server_port,
            self.terminal_port,
            self.language_port,
            self.memory_limit_mib,
        )
    }

    /// 포트 발견 재시도 간격
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// 유휴 회수 기준 시간
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// 유휴 검사 주기
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn config_error(field: &str, reason: String) -> OrchestratorError {
    OrchestratorError::Config {
        field: field.to_owned(),
        reason,
    }
}

/// 오케스트레이터 설정 빌더
#[derive(Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔진 호스트 목록을 설정합니다.
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// 엔진 원격 API 포트를 설정합니다.
    pub fn engine_port(mut self, port: u16) -> Self {
        self.config.engine_port = port;
        self
    }

    /// 엔진 연결 타임아웃(초)을 설정합니다.
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    /// 컨테이너 내부 포트 3종을 설정합니다.
    pub fn container_ports(mut self, server: u16, terminal: u16, language: u16) -> Self {
        self.config.server_port = server;
        self.config.terminal_port = terminal;
        self.config.language_port = language;
        self
    }

    /// 메모리 상한(MiB)을 설정합니다.
    pub fn memory_limit_mib(mut self, mib: u64) -> Self {
        self.config.memory_limit_mib = mib;
        self
    }

    /// 포트 발견 재시도 간격(밀리초)을 설정합니다.
    pub fn discovery_interval_ms(mut self, ms: u64) -> Self {
        self.config.discovery_interval_ms = ms;
        self
    }

    /// 포트 발견 최대 조회 횟수를 설정합니다.
    pub fn discovery_max_attempts(mut self, attempts: u32) -> Self {
        self.config.discovery_max_attempts = attempts;
        self
    }

    /// 유휴 회수 기준 시간(초)을 설정합니다.
    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.config.idle_timeout_secs = secs;
        self
    }

    /// 유휴 검사 주기(초)를 설정합니다.
    pub fn sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.sweep_interval_secs = secs;
        self
    }

    /// 이벤트 채널 용량을 설정합니다.
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    /// 설정을 검증하고 `OrchestratorConfig`를 생성합니다.
    pub fn build(self) -> Result<OrchestratorConfig, OrchestratorError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

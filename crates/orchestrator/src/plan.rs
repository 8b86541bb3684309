//! 포트 계획: 모든 컨테이너에 공통으로 적용되는 공개 포트와 메모리 상한
//!
//! 호스트 측 포트는 고정하지 않습니다. 빈 바인딩을 선언하면 엔진이 사용 가능한
//! 포트를 골라 주고, 그 결과는 [`discover`](crate::ports::PortDiscovery::discover)로 읽어옵니다.

use vslab_core::types::{ImageKind, PublishedPorts};

use crate::engine::ContainerSpec;
use crate::error::OrchestratorError;
use crate::ports::PortMapping;

/// 컨테이너 환경변수로 전달하는 호스트 주소 키
pub const HOST_IP_ENV: &str = "HOST_IP";

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// 공개 포트 및 자원 상한 계획
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    server_port: u16,
    terminal_port: u16,
    language_port: u16,
    memory_limit_mib: u64,
}

impl Default for PortPlan {
    fn default() -> Self {
        Self {
            server_port: 3000,
            terminal_port: 4000,
            language_port: 5000,
            memory_limit_mib: 300,
        }
    }
}

impl PortPlan {
    /// 포트 계획을 생성합니다. 포트는 0이 아니고 서로 달라야 합니다.
    pub fn new(
        server_port: u16,
        terminal_port: u16,
        language_port: u16,
        memory_limit_mib: u64,
    ) -> Result<Self, OrchestratorError> {
        for (field, port) in [
            ("server_port", server_port),
            ("terminal_port", terminal_port),
            ("language_port", language_port),
        ] {
            if port == 0 {
                return Err(OrchestratorError::Config {
                    field: field.to_owned(),
                    reason: "must not be 0".to_owned(),
                });
            }
        }

        if server_port == terminal_port
            || terminal_port == language_port
            || server_port == language_port
        {
            return Err(OrchestratorError::Config {
                field: "ports".to_owned(),
                reason: format!(
                    "container ports must be distinct (got {server_port}, {terminal_port}, {language_port})"
                ),
            });
        }

        if memory_limit_mib == 0 {
            return Err(OrchestratorError::Config {
                field: "memory_limit_mib".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        Ok(Self {
            server_port,
            terminal_port,
            language_port,
            memory_limit_mib,
        })
    }

    /// 공개할 컨테이너 내부 포트 (server, terminal, language 순서)
    pub fn container_ports(&self) -> [u16; 3] {
        [self.server_port, self.terminal_port, self.language_port]
    }

    /// 메모리 상한 (MiB)
    pub fn memory_limit_mib(&self) -> u64 {
        self.memory_limit_mib
    }

    /// 엔진 API가 요구하는 바이트 단위 메모리 상한
    pub fn memory_limit_bytes(&self) -> i64 {
        i64::try_from(self.memory_limit_mib.saturating_mul(BYTES_PER_MIB)).unwrap_or(i64::MAX)
    }

    /// 이미지 종류와 배치 호스트로 컨테이너 생성 명세를 만듭니다.
    pub fn container_spec(&self, image_kind: ImageKind, host: &str) -> ContainerSpec {
        ContainerSpec {
            image: image_kind.image_name().to_owned(),
            env: vec![format!("{HOST_IP_ENV}={host}")],
            exposed_ports: self.container_ports().to_vec(),
            memory_limit_bytes: self.memory_limit_bytes(),
        }
    }

    /// 발견된 매핑에서 계획한 세 포트를 모두 찾으면 공개 포트를 반환합니다.
    ///
    /// 하나라도 빠졌거나 호스트 포트가 겹치면 `None`입니다.
    pub fn resolve(&self, mapping: &PortMapping) -> Option<PublishedPorts> {
        let ports = PublishedPorts {
            server_port: *mapping.get(&self.server_port)?,
            terminal_port: *mapping.get(&self.terminal_port)?,
            language_port: *mapping.get(&self.language_port)?,
        };
        ports.is_well_formed().then_some(ports)
    }
}

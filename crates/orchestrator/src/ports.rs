//! 포트 발견: 엔진이 고른 호스트 포트를 제한된 횟수 안에 읽어옵니다.
//!
//! 컨테이너를 시작한 직후에는 엔진이 포트 매핑을 아직 채우지 않았을 수 있습니다.
//! [`PortDiscovery`]는 매핑이 계획한 모든 포트를 덮을 때까지 고정 간격으로
//! 다시 조회하고, 한도를 넘기면 `PortDiscoveryTimeout`을 반환합니다.
//!
//! 구조화된 API를 쓰지 못하는 엔진을 위해 CLI의 텍스트 출력
//! (`3000/tcp -> 0.0.0.0:32768`)을 해석하는 [`parse_port_lines`]도 제공합니다.

use std::collections::BTreeMap;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};
use vslab_core::metrics as m;
use vslab_core::types::PublishedPorts;

use crate::engine::EngineClient;
use crate::error::OrchestratorError;
use crate::plan::PortPlan;

/// 컨테이너 내부 포트 → 호스트 포트
pub type PortMapping = BTreeMap<u16, u16>;

/// `"3000/tcp"` 형식의 포트 키에서 TCP 포트 번호를 꺼냅니다.
///
/// 프로토콜이 생략된 키는 TCP로 취급합니다. UDP 등 다른 프로토콜은 `None`입니다.
pub fn parse_port_key(key: &str) -> Option<u16> {
    let key = key.trim();
    let (port, proto) = match key.split_once('/') {
        Some((port, proto)) => (port, proto),
        None => (key, "tcp"),
    };
    if !proto.eq_ignore_ascii_case("tcp") {
        return None;
    }
    port.parse::<u16>().ok().filter(|p| *p != 0)
}

/// 포트 출력 한 줄을 (컨테이너 포트, 호스트 포트)로 해석합니다.
///
/// ```text
/// 3000/tcp -> 0.0.0.0:32768
/// 3000/tcp -> [::]:32768
/// ```
///
/// 빈 줄, TCP가 아닌 항목, 형식이 맞지 않는 줄은 `None`입니다.
pub fn parse_port_binding_line(line: &str) -> Option<(u16, u16)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (key, address) = line.split_once("->")?;
    let container_port = parse_port_key(key)?;
    let (_, host_port) = address.trim().rsplit_once(':')?;
    let host_port = host_port.trim().parse::<u16>().ok().filter(|p| *p != 0)?;
    Some((container_port, host_port))
}

/// 포트 출력 전체를 매핑으로 해석합니다.
///
/// 같은 컨테이너 포트가 IPv4/IPv6로 두 번 나오면 먼저 나온 줄을 사용합니다.
pub fn parse_port_lines(output: &str) -> PortMapping {
    let mut mapping = PortMapping::new();
    for (container_port, host_port) in output.lines().filter_map(parse_port_binding_line) {
        mapping.entry(container_port).or_insert(host_port);
    }
    mapping
}

/// 제한된 재시도로 공개 포트를 발견합니다.
#[derive(Debug, Clone, Copy)]
pub struct PortDiscovery {
    interval: Duration,
    max_attempts: u32,
}

impl PortDiscovery {
    /// 재시도 간격과 최대 조회 횟수로 생성합니다. 최소 한 번은 조회합니다.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// 최대 조회 횟수
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 컨테이너의 공개 포트를 계획에 맞춰 발견합니다.
    ///
    /// 빈 매핑, 일부만 채워진 매핑, 조회 실패는 모두 재시도합니다.
    /// 한도를 넘기면 컨테이너는 호스트에 남은 채로 `PortDiscoveryTimeout`을 반환합니다.
    pub async fn discover<C: EngineClient>(
        &self,
        client: &C,
        host: &str,
        container_id: &str,
        plan: &PortPlan,
    ) -> Result<PublishedPorts, OrchestratorError> {
        for attempt in 1..=self.max_attempts {
            counter!(m::DISCOVERY_ATTEMPTS_TOTAL).increment(1);

            match client.published_ports(container_id).await {
                Ok(mapping) => {
                    if let Some(ports) = plan.resolve(&mapping) {
                        debug!(
                            host = host,
                            container_id = container_id,
                            attempt = attempt,
                            "published ports discovered"
                        );
                        return Ok(ports);
                    }
                    debug!(
                        host = host,
                        container_id = container_id,
                        attempt = attempt,
                        found = mapping.len(),
                        "port mapping incomplete, retrying"
                    );
                }
                Err(e) => {
                    warn!(
                        host = host,
                        container_id = container_id,
                        attempt = attempt,
                        error = %e,
                        "port query failed, retrying"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        counter!(m::DISCOVERY_TIMEOUTS_TOTAL).increment(1);
        Err(OrchestratorError::PortDiscoveryTimeout {
            host: host.to_owned(),
            container_id: container_id.to_owned(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngineClient;
    use std::sync::atomic::Ordering;

    const SAMPLE_OUTPUT: &str = "3000/tcp -> 0.0.0.0:32768\n\
                                 4000/tcp -> 0.0.0.0:32769\n\
                                 5000/tcp -> 0.0.0.0:32770\n";

    #[test]
    fn parses_cli_port_output() {
        let mapping = parse_port_lines(SAMPLE_OUTPUT);
        let expected: PortMapping = [(3000, 32768), (4000, 32769), (5000, 32770)]
            .into_iter()
            .collect();
        assert_eq!(mapping, expected);
    }

    #[test]
    fn parses_ipv6_binding() {
        assert_eq!(
            parse_port_binding_line("3000/tcp -> [::]:32768"),
            Some((3000, 32768))
        );
    }

    #[test]
    fn first_binding_wins_for_dual_stack() {
        let output = "3000/tcp -> 0.0.0.0:32768\n3000/tcp -> [::]:32799\n";
        assert_eq!(parse_port_lines(output).get(&3000), Some(&32768));
    }

    #[test]
    fn ignores_blank_and_udp_lines() {
        let output = "\n  \n53/udp -> 0.0.0.0:5353\n4000/tcp -> 0.0.0.0:32769\n";
        let mapping = parse_port_lines(output);
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get(&4000), Some(&32769));
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_port_binding_line("3000/tcp"), None);
        assert_eq!(parse_port_binding_line("abc/tcp -> 0.0.0.0:1"), None);
        assert_eq!(parse_port_binding_line("3000/tcp -> 0.0.0.0:notaport"), None);
        assert_eq!(parse_port_binding_line("3000/tcp -> 0.0.0.0:0"), None);
        assert_eq!(parse_port_binding_line("3000/tcp -> 0.0.0.0:70000"), None);
    }

    #[test]
    fn port_key_defaults_to_tcp() {
        assert_eq!(parse_port_key("3000/tcp"), Some(3000));
        assert_eq!(parse_port_key("3000/TCP"), Some(3000));
        assert_eq!(parse_port_key("3000"), Some(3000));
        assert_eq!(parse_port_key("3000/udp"), None);
        assert_eq!(parse_port_key("0/tcp"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn discover_retries_until_mapping_appears() {
        let client = MockEngineClient::new().with_empty_port_replies(3);
        let spec = PortPlan::default().container_spec(vslab_core::ImageKind::Java, "h");
        let id = client.create_container(&spec).await.unwrap();
        let short = &id[..12];

        let discovery = PortDiscovery::new(Duration::from_millis(1000), 30);
        let ports = discovery
            .discover(&client, "h", short, &PortPlan::default())
            .await
            .unwrap();
        assert!(ports.is_well_formed());
        assert_eq!(client.port_queries.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn discover_gives_up_after_max_attempts() {
        let client = MockEngineClient::new().with_unpublished_ports();
        let spec = PortPlan::default().container_spec(vslab_core::ImageKind::Python3, "h");
        let id = client.create_container(&spec).await.unwrap();
        let short = id[..12].to_owned();

        let started = tokio::time::Instant::now();
        let discovery = PortDiscovery::new(Duration::from_millis(1000), 5);
        let err = discovery
            .discover(&client, "h", &short, &PortPlan::default())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::PortDiscoveryTimeout {
                container_id,
                attempts,
                ..
            } => {
                assert_eq!(container_id, short);
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.port_queries.load(Ordering::SeqCst), 5);
        // 마지막 조회 뒤에는 기다리지 않음
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(4000));
        assert!(waited < Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn discover_treats_query_errors_as_retryable() {
        let client = MockEngineClient::new();
        let discovery = PortDiscovery::new(Duration::from_millis(10), 3);
        // 존재하지 않는 컨테이너: 매 조회가 실패
        let err = discovery
            .discover(&client, "h", "abcdef012345", &PortPlan::default())
            .await
            .unwrap_err();
        assert!(err.is_inconsistency());
        assert_eq!(client.port_queries.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let discovery = PortDiscovery::new(Duration::ZERO, 0);
        assert_eq!(discovery.max_attempts(), 1);
    }
}

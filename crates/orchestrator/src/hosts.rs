//! 엔진 호스트 풀과 클라이언트 팩토리
//!
//! [`HostRegistry`]는 설정으로 주어진 호스트 목록을 검증해 보관하고 균등 무작위로
//! 하나를 고릅니다. [`EngineClientFactory`]는 호스트별 엔진 클라이언트를 만들어
//! 캐시합니다. 레지스트리에 없는 호스트는 거부합니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tracing::debug;

use crate::config::OrchestratorConfig;
use crate::engine::{BollardEngineClient, EngineClient};
use crate::error::OrchestratorError;

/// 엔진 호스트 목록
///
/// 비어 있지 않고, 공백이 제거되고, 중복이 없는 목록을 보장합니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRegistry {
    hosts: Vec<String>,
}

impl HostRegistry {
    /// 호스트 목록으로 레지스트리를 생성합니다.
    ///
    /// 빈 항목은 건너뛰고 중복은 처음 나온 것만 남깁니다.
    /// 남은 호스트가 없으면 `NoHosts`를 반환합니다.
    pub fn new<I, S>(hosts: I) -> Result<Self, OrchestratorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for host in hosts {
            let host = host.as_ref().trim();
            if host.is_empty() || unique.iter().any(|h| h == host) {
                continue;
            }
            unique.push(host.to_owned());
        }
        if unique.is_empty() {
            return Err(OrchestratorError::NoHosts);
        }
        Ok(Self { hosts: unique })
    }

    /// 등록된 호스트 목록
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// 등록된 호스트 수
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// 항상 `false` (빈 레지스트리는 만들 수 없음)
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// 등록된 호스트인지 확인합니다.
    pub fn contains(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h == host)
    }

    /// 균등 무작위로 호스트 하나를 고릅니다.
    pub fn select_random(&self) -> Result<&str, OrchestratorError> {
        self.hosts
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .ok_or(OrchestratorError::NoHosts)
    }
}

/// 호스트별 엔진 클라이언트를 제공하는 팩토리
pub trait EngineClientFactory: Send + Sync + 'static {
    /// 팩토리가 만드는 클라이언트 타입
    type Client: EngineClient;

    /// 팩토리가 접근할 수 있는 호스트 목록
    fn registry(&self) -> &HostRegistry;

    /// 호스트의 엔진 클라이언트를 반환합니다.
    ///
    /// 같은 호스트에는 같은 클라이언트를 돌려줍니다. 레지스트리는 새 배치의 호스트
    /// 선택에만 쓰이므로, 풀에서 빠진 호스트라도 기록된 배치가 있으면 접근할 수
    /// 있어야 합니다. 클라이언트를 만들 수 없으면 `HostUnreachable`입니다.
    fn client(&self, host: &str) -> Result<Arc<Self::Client>, OrchestratorError>;
}

/// `bollard` 기반 클라이언트를 호스트별로 캐시하는 팩토리
pub struct BollardEngineFactory {
    registry: HostRegistry,
    engine_port: u16,
    connect_timeout_secs: u64,
    cache: Mutex<HashMap<String, Arc<BollardEngineClient>>>,
}

impl BollardEngineFactory {
    /// 레지스트리와 연결 설정으로 팩토리를 생성합니다.
    pub fn new(registry: HostRegistry, engine_port: u16, connect_timeout_secs: u64) -> Self {
        Self {
            registry,
            engine_port,
            connect_timeout_secs,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// 오케스트레이터 설정에서 팩토리를 생성합니다.
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let registry = HostRegistry::new(&config.hosts)?;
        Ok(Self::new(
            registry,
            config.engine_port,
            config.connect_timeout_secs,
        ))
    }

    /// 캐시된 클라이언트 수
    pub fn cached_clients(&self) -> usize {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl EngineClientFactory for BollardEngineFactory {
    type Client = BollardEngineClient;

    fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    fn client(&self, host: &str) -> Result<Arc<BollardEngineClient>, OrchestratorError> {
        if !self.registry.contains(host) {
            debug!(host = host, "serving client for host outside the registry");
        }

        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(client) = cache.get(host) {
            return Ok(Arc::clone(client));
        }

        let client =
            BollardEngineClient::connect_http(host, self.engine_port, self.connect_timeout_secs)
                .map_err(|e| OrchestratorError::HostUnreachable {
                    host: host.to_owned(),
                    reason: e.to_string(),
                })?;
        let client = Arc::new(client);
        cache.insert(host.to_owned(), Arc::clone(&client));
        debug!(host = host, port = self.engine_port, "engine client created");
        Ok(client)
    }
}

/// 테스트용 Mock 팩토리
///
/// 호스트마다 미리 만든 `MockEngineClient`를 돌려줍니다.
#[cfg(test)]
pub struct MockEngineFactory {
    registry: HostRegistry,
    clients: HashMap<String, Arc<crate::engine::MockEngineClient>>,
}

#[cfg(test)]
impl MockEngineFactory {
    /// 모든 호스트에 기본 mock 클라이언트를 둔 팩토리를 생성합니다.
    pub fn new(hosts: &[&str]) -> Self {
        Self::with_client(hosts, |_| crate::engine::MockEngineClient::new())
    }

    /// 호스트마다 `make`로 만든 클라이언트를 둔 팩토리를 생성합니다.
    pub fn with_client(
        hosts: &[&str],
        make: impl Fn(&str) -> crate::engine::MockEngineClient,
    ) -> Self {
        let registry = HostRegistry::new(hosts).unwrap_or_else(|e| panic!("invalid hosts: {e}"));
        let clients = registry
            .hosts()
            .iter()
            .map(|h| (h.clone(), Arc::new(make(h))))
            .collect();
        Self { registry, clients }
    }

    /// 호스트의 mock 클라이언트
    pub fn mock(&self, host: &str) -> Arc<crate::engine::MockEngineClient> {
        Arc::clone(&self.clients[host])
    }

    /// 모든 호스트의 create 호출 합계
    pub fn total_creates(&self) -> usize {
        self.clients.values().map(|c| c.creates()).sum()
    }

    /// 모든 호스트에 남아 있는 컨테이너 합계
    pub fn total_containers(&self) -> usize {
        self.clients.values().map(|c| c.container_count()).sum()
    }
}

#[cfg(test)]
impl EngineClientFactory for MockEngineFactory {
    type Client = crate::engine::MockEngineClient;

    fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    fn client(&self, host: &str) -> Result<Arc<Self::Client>, OrchestratorError> {
        self.clients
            .get(host)
            .cloned()
            .ok_or_else(|| OrchestratorError::HostUnreachable {
                host: host.to_owned(),
                reason: "host is not in the registry".to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn registry_rejects_empty_list() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            HostRegistry::new(empty),
            Err(OrchestratorError::NoHosts)
        ));
        assert!(matches!(
            HostRegistry::new(["", "  "]),
            Err(OrchestratorError::NoHosts)
        ));
    }

    #[test]
    fn registry_dedupes_and_trims() {
        let registry = HostRegistry::new([" 10.0.0.1", "10.0.0.2", "10.0.0.1 "]).unwrap();
        assert_eq!(registry.hosts(), ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert!(registry.contains("10.0.0.2"));
        assert!(!registry.contains("10.0.0.3"));
    }

    #[test]
    fn select_random_returns_registered_host() {
        let registry = HostRegistry::new(["a", "b", "c"]).unwrap();
        for _ in 0..50 {
            let host = registry.select_random().unwrap();
            assert!(registry.contains(host));
        }
    }

    #[test]
    fn select_random_eventually_covers_every_host() {
        let registry = HostRegistry::new(["a", "b", "c"]).unwrap();
        let seen: HashSet<_> = (0..500)
            .map(|_| registry.select_random().unwrap().to_owned())
            .collect();
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn bollard_factory_caches_per_host() {
        let registry = HostRegistry::new(["127.0.0.1", "127.0.0.2"]).unwrap();
        let factory = BollardEngineFactory::new(registry, 2376, 5);

        let a1 = factory.client("127.0.0.1").unwrap();
        let a2 = factory.client("127.0.0.1").unwrap();
        let b = factory.client("127.0.0.2").unwrap();

        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(factory.cached_clients(), 2);
    }

    #[tokio::test]
    async fn bollard_factory_serves_host_removed_from_pool() {
        // 이전 설정에서 배치된 호스트: 현재 풀에는 없음
        let factory = BollardEngineFactory::from_config(&OrchestratorConfig::default()).unwrap();
        assert!(!factory.registry().contains("192.0.2.1"));

        let client = factory.client("192.0.2.1").unwrap();
        let again = factory.client("192.0.2.1").unwrap();
        assert!(Arc::ptr_eq(&client, &again));
        assert_eq!(factory.cached_clients(), 1);
    }

    #[test]
    fn mock_factory_serves_registered_hosts() {
        let factory = MockEngineFactory::new(&["h1", "h2"]);
        assert!(factory.client("h1").is_ok());
        assert!(factory.client("h3").is_err());
        assert_eq!(factory.registry().len(), 2);
    }
}

//! Container engine API abstraction for testability.
//!
//! The [`EngineClient`] trait abstracts one host's container engine remote API,
//! allowing production code to use [`BollardEngineClient`] while tests use
//! `MockEngineClient`.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐
//! │ ContainerOrchestrator │
//! └───────────┬───────────┘
//!             │  EngineClientFactory::client(host)
//!             ▼
//!      ┌──────────────┐
//!      │ EngineClient │ (trait)
//!      └──────────────┘
//!          │      │
//!          ▼      ▼
//!    ┌───────┐ ┌──────┐
//!    │Bollard│ │ Mock │
//!    └───┬───┘ └──────┘
//!        │ tcp://<host>:<engine_port>
//!        ▼
//!   Engine daemon
//! ```
//!
//! # Container ID Validation
//!
//! All methods that accept container IDs validate them first:
//! - Must be 1-64 characters
//! - Must contain only ASCII hex digits ([0-9a-fA-F])

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;
use vslab_core::error::EngineError;

use crate::ports::{PortMapping, parse_port_key};

/// Validates a container ID before it reaches the engine API.
///
/// Engine container IDs are 64-character hex strings (or shorter prefix forms).
fn validate_container_id(id: &str) -> Result<(), EngineError> {
    if id.is_empty() || id.len() > 64 {
        return Err(EngineError::Api(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(EngineError::Api(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// Everything the engine needs to create a project container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image name resolved from the project's image kind
    pub image: String,
    /// Environment entries in `KEY=value` form
    pub env: Vec<String>,
    /// Container-internal TCP ports to publish on engine-chosen host ports
    pub exposed_ports: Vec<u16>,
    /// Memory ceiling in bytes
    pub memory_limit_bytes: i64,
}

/// Trait abstracting one engine host's control-plane operations.
///
/// The trait is `Send + Sync + 'static`, allowing clients to be shared as
/// `Arc<C>` across tasks.
///
/// # Error Handling
///
/// - **404 on an existing-container call**: `EngineError::ContainerNotFound`
/// - **Transport failures and timeouts**: `EngineError::HostUnreachable`
/// - **Everything else**: `EngineError::Api`
pub trait EngineClient: Send + Sync + 'static {
    /// Creates (but does not start) a container and returns its full ID.
    fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    /// Starts a created container.
    fn start_container(&self, id: &str) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Removes a container. With `force`, a running container is killed first.
    fn remove_container(
        &self,
        id: &str,
        force: bool,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Returns the container-port to host-port mapping currently published.
    ///
    /// The mapping may be empty or partial while the engine is still wiring ports.
    fn published_ports(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<PortMapping, EngineError>> + Send;

    /// Checks engine connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// Production engine client implementation using `bollard`.
///
/// Talks to a remote engine over TCP. Internally uses `Arc<bollard::Docker>`
/// so clones of the client share one connection pool.
pub struct BollardEngineClient {
    host: String,
    docker: Arc<bollard::Docker>,
}

impl BollardEngineClient {
    /// Builds a client bound to `tcp://<host>:<port>`.
    ///
    /// No network traffic happens here; the first request opens the connection.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::HostUnreachable` if the address cannot be used.
    pub fn connect_http(host: &str, port: u16, timeout_secs: u64) -> Result<Self, EngineError> {
        let address = engine_address(host, port);
        let docker =
            bollard::Docker::connect_with_http(&address, timeout_secs, bollard::API_DEFAULT_VERSION)
                .map_err(|e| EngineError::HostUnreachable {
                    host: host.to_owned(),
                    reason: format!("failed to configure engine client for {address}: {e}"),
                })?;
        Ok(Self {
            host: host.to_owned(),
            docker: Arc::new(docker),
        })
    }

    /// Host this client is bound to.
    pub fn host(&self) -> &str {
        &self.host
    }

    fn classify(&self, container_id: Option<&str>, err: bollard::errors::Error) -> EngineError {
        use bollard::errors::Error;

        match (&err, container_id) {
            (Error::DockerResponseServerError { status_code: 404, .. }, Some(id)) => {
                EngineError::ContainerNotFound(id.to_owned())
            }
            (Error::RequestTimeoutError, _) | (Error::IOError { .. }, _) => {
                EngineError::HostUnreachable {
                    host: self.host.clone(),
                    reason: err.to_string(),
                }
            }
            _ => EngineError::Api(err.to_string()),
        }
    }
}

/// Formats the engine endpoint, bracketing IPv6 literals.
fn engine_address(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("tcp://[{host}]:{port}")
    } else {
        format!("tcp://{host}:{port}")
    }
}

/// Converts the engine's structured port map into a container-to-host mapping.
///
/// Non-TCP keys, unbound ports and unparsable host ports are skipped; when a
/// port is bound on several addresses the first usable binding wins.
pub fn mapping_from_port_map(
    ports: &HashMap<String, Option<Vec<bollard::models::PortBinding>>>,
) -> PortMapping {
    let mut mapping = PortMapping::new();
    for (key, bindings) in ports {
        let Some(container_port) = parse_port_key(key) else {
            continue;
        };
        let host_port = bindings
            .iter()
            .flatten()
            .filter_map(|b| b.host_port.as_deref())
            .filter_map(|p| p.parse::<u16>().ok())
            .find(|p| *p != 0);
        if let Some(host_port) = host_port {
            mapping.insert(container_port, host_port);
        }
    }
    mapping
}

impl EngineClient for BollardEngineClient {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, PortBinding};

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        for port in &spec.exposed_ports {
            let key = format!("{port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            // Empty binding: the engine picks the host port
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: None,
                }]),
            );
        }

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                publish_all_ports: Some(false),
                memory: Some(spec.memory_limit_bytes),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| self.classify(None, e))?;

        debug!(host = %self.host, container_id = %response.id, image = %spec.image, "container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        use bollard::container::StartContainerOptions;

        validate_container_id(id)?;
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| self.classify(Some(id), e))
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        use bollard::container::RemoveContainerOptions;

        validate_container_id(id)?;
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| self.classify(Some(id), e))
    }

    async fn published_ports(&self, id: &str) -> Result<PortMapping, EngineError> {
        use bollard::container::InspectContainerOptions;

        validate_container_id(id)?;
        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| self.classify(Some(id), e))?;

        let mapping = details
            .network_settings
            .and_then(|n| n.ports)
            .map(|ports| mapping_from_port_map(&ports))
            .unwrap_or_default();
        Ok(mapping)
    }

    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map_err(|e| EngineError::HostUnreachable {
                host: self.host.clone(),
                reason: format!("ping failed: {e}"),
            })?;
        Ok(())
    }
}

/// 테스트용 Mock 엔진 클라이언트
///
/// 컨테이너를 메모리에 기록하고 호출 횟수를 세어, 엔진 없이 오케스트레이터를
/// 검증할 수 있게 합니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockEngineClient {
    state: std::sync::Mutex<MockEngineState>,
    /// create_container 호출 횟수
    pub create_calls: std::sync::atomic::AtomicUsize,
    /// remove_container 호출 횟수
    pub remove_calls: std::sync::atomic::AtomicUsize,
    /// published_ports 호출 횟수
    pub port_queries: std::sync::atomic::AtomicUsize,
    fail_create: bool,
    fail_start: bool,
    fail_remove: bool,
    fail_ping: bool,
    never_publish: bool,
    empty_port_replies: usize,
}

#[cfg(test)]
#[derive(Default)]
struct MockEngineState {
    next_seq: u64,
    next_host_port: u16,
    containers: HashMap<String, MockContainer>,
}

#[cfg(test)]
struct MockContainer {
    spec: ContainerSpec,
    running: bool,
    queries: usize,
    mapping: PortMapping,
}

#[cfg(test)]
impl MockEngineClient {
    /// 항상 성공하는 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// create_container가 실패하도록 설정합니다.
    pub fn with_failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// start_container가 실패하도록 설정합니다.
    pub fn with_failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// remove_container가 실패하도록 설정합니다.
    pub fn with_failing_remove(mut self) -> Self {
        self.fail_remove = true;
        self
    }

    /// ping이 실패하도록 설정합니다.
    pub fn with_failing_ping(mut self) -> Self {
        self.fail_ping = true;
        self
    }

    /// 포트 매핑을 끝내 돌려주지 않도록 설정합니다.
    pub fn with_unpublished_ports(mut self) -> Self {
        self.never_publish = true;
        self
    }

    /// 처음 `replies`번의 포트 조회에는 빈 매핑을 돌려줍니다.
    pub fn with_empty_port_replies(mut self, replies: usize) -> Self {
        self.empty_port_replies = replies;
        self
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockEngineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 현재 엔진에 남아 있는 컨테이너 수
    pub fn container_count(&self) -> usize {
        self.lock_state().containers.len()
    }

    /// 실행 중인 컨테이너 수
    pub fn running_count(&self) -> usize {
        self.lock_state()
            .containers
            .values()
            .filter(|c| c.running)
            .count()
    }

    /// 컨테이너 존재 여부
    pub fn has_container(&self, id: &str) -> bool {
        self.lock_state().containers.contains_key(id)
    }

    /// 생성 시 전달된 명세
    pub fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.lock_state().containers.get(id).map(|c| c.spec.clone())
    }

    /// 엔진 밖에서 컨테이너가 사라진 상황을 흉내 냅니다.
    pub fn forget_container(&self, id: &str) {
        self.lock_state().containers.remove(id);
    }

    /// create_container 호출 횟수
    pub fn creates(&self) -> usize {
        self.create_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl EngineClient for MockEngineClient {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        use std::sync::atomic::Ordering;

        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Err(EngineError::Api("mock create failure".to_owned()));
        }

        let mut state = self.lock_state();
        state.next_seq += 1;
        if state.next_host_port == 0 {
            state.next_host_port = 32768;
        }
        let full_id = format!("{:012x}{}", state.next_seq, "f".repeat(52));
        let short_id = full_id[..12].to_owned();

        let mut mapping = PortMapping::new();
        for port in &spec.exposed_ports {
            mapping.insert(*port, state.next_host_port);
            state.next_host_port += 1;
        }

        state.containers.insert(
            short_id,
            MockContainer {
                spec: spec.clone(),
                running: false,
                queries: 0,
                mapping,
            },
        );
        Ok(full_id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        validate_container_id(id)?;
        if self.fail_start {
            return Err(EngineError::Api("mock start failure".to_owned()));
        }
        let mut state = self.lock_state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        container.running = true;
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        use std::sync::atomic::Ordering;

        validate_container_id(id)?;
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_remove {
            return Err(EngineError::Api("mock remove failure".to_owned()));
        }
        self.lock_state()
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))
    }

    async fn published_ports(&self, id: &str) -> Result<PortMapping, EngineError> {
        use std::sync::atomic::Ordering;

        validate_container_id(id)?;
        self.port_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock_state();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::ContainerNotFound(id.to_owned()))?;
        container.queries += 1;
        if self.never_publish || container.queries <= self.empty_port_replies {
            return Ok(PortMapping::new());
        }
        Ok(container.mapping.clone())
    }

    async fn ping(&self) -> Result<(), EngineError> {
        if self.fail_ping {
            return Err(EngineError::HostUnreachable {
                host: "mock".to_owned(),
                reason: "mock ping failure".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::PortBinding;

    fn sample_spec() -> ContainerSpec {
        ContainerSpec {
            image: "vlab-base".to_owned(),
            env: vec!["HOST_IP=10.0.0.1".to_owned()],
            exposed_ports: vec![3000, 4000, 5000],
            memory_limit_bytes: 300 * 1024 * 1024,
        }
    }

    fn binding(port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some("0.0.0.0".to_owned()),
            host_port: Some(port.to_owned()),
        }
    }

    #[test]
    fn validate_container_id_rules() {
        assert!(validate_container_id("abcdef012345").is_ok());
        assert!(validate_container_id("").is_err());
        assert!(validate_container_id("not-hex!").is_err());
        assert!(validate_container_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn engine_address_formats() {
        assert_eq!(engine_address("10.0.0.1", 2376), "tcp://10.0.0.1:2376");
        assert_eq!(engine_address("fd00::1", 2376), "tcp://[fd00::1]:2376");
        assert_eq!(engine_address("engine-1.lab", 2375), "tcp://engine-1.lab:2375");
    }

    #[tokio::test]
    async fn connect_http_does_not_touch_network() {
        let client = BollardEngineClient::connect_http("127.0.0.1", 2376, 5).unwrap();
        assert_eq!(client.host(), "127.0.0.1");
    }

    #[test]
    fn port_map_conversion_takes_first_binding() {
        let mut ports = HashMap::new();
        ports.insert(
            "3000/tcp".to_owned(),
            Some(vec![binding("32768"), binding("32771")]),
        );
        ports.insert("4000/tcp".to_owned(), Some(vec![binding("32769")]));
        ports.insert("5000/tcp".to_owned(), Some(vec![binding("32770")]));

        let mapping = mapping_from_port_map(&ports);
        assert_eq!(mapping.get(&3000), Some(&32768));
        assert_eq!(mapping.get(&4000), Some(&32769));
        assert_eq!(mapping.get(&5000), Some(&32770));
    }

    #[test]
    fn port_map_conversion_skips_unbound_and_udp() {
        let mut ports = HashMap::new();
        ports.insert("3000/tcp".to_owned(), None);
        ports.insert("4000/tcp".to_owned(), Some(Vec::new()));
        ports.insert("5000/udp".to_owned(), Some(vec![binding("40000")]));
        ports.insert(
            "6000/tcp".to_owned(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some("".to_owned()),
            }]),
        );
        assert!(mapping_from_port_map(&ports).is_empty());
    }

    #[tokio::test]
    async fn mock_client_create_start_remove() {
        let client = MockEngineClient::new();
        let full_id = client.create_container(&sample_spec()).await.unwrap();
        assert_eq!(full_id.len(), 64);
        let short = &full_id[..12];
        client.start_container(short).await.unwrap();
        assert_eq!(client.running_count(), 1);
        client.remove_container(short, true).await.unwrap();
        assert_eq!(client.container_count(), 0);
    }

    #[tokio::test]
    async fn mock_client_ids_are_unique_by_prefix() {
        let client = MockEngineClient::new();
        let a = client.create_container(&sample_spec()).await.unwrap();
        let b = client.create_container(&sample_spec()).await.unwrap();
        assert_ne!(a[..12], b[..12]);
        assert_eq!(client.creates(), 2);
    }

    #[tokio::test]
    async fn mock_client_remove_unknown_is_not_found() {
        let client = MockEngineClient::new();
        let err = client.remove_container("abcdef012345", true).await.unwrap_err();
        assert!(matches!(err, EngineError::ContainerNotFound(_)));
    }

    #[tokio::test]
    async fn mock_client_empty_port_replies_then_mapping() {
        let client = MockEngineClient::new().with_empty_port_replies(2);
        let id = client.create_container(&sample_spec()).await.unwrap();
        let short = &id[..12];
        assert!(client.published_ports(short).await.unwrap().is_empty());
        assert!(client.published_ports(short).await.unwrap().is_empty());
        let mapping = client.published_ports(short).await.unwrap();
        assert_eq!(mapping.len(), 3);
    }

    #[tokio::test]
    async fn mock_client_failing_modes() {
        let client = MockEngineClient::new()
            .with_failing_create()
            .with_failing_ping();
        assert!(client.create_container(&sample_spec()).await.is_err());
        assert!(client.ping().await.is_err());
        assert_eq!(client.container_count(), 0);
    }

    #[test]
    fn engine_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<MockEngineClient>();
        assert_send_sync::<BollardEngineClient>();
    }
}

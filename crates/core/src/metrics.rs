//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `vslab_`
//! - 구성 요소명: `orchestrator_`, `discovery_`, `keeper_`, `control_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(vslab_core::metrics::ORCHESTRATOR_STARTS_TOTAL,
//!     vslab_core::metrics::LABEL_RESULT => "success").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 엔진 호스트 레이블 키
pub const LABEL_HOST: &str = "host";

/// 제어 요청 종류 레이블 키 (reserve, start, stop, ...)
pub const LABEL_OPERATION: &str = "op";

/// 이미지 종류 레이블 키 (PYTHON2, PYTHON3, CPP, JAVA)
pub const LABEL_IMAGE_KIND: &str = "image_kind";

// ─── Orchestrator 메트릭 ────────────────────────────────────────────

/// Orchestrator: 예약된 프로젝트 수 (counter, label: image_kind)
pub const ORCHESTRATOR_PROJECTS_RESERVED_TOTAL: &str =
    "vslab_orchestrator_projects_reserved_total";

/// Orchestrator: 새 컨테이너 기동 시도 수 (counter, labels: host, result)
pub const ORCHESTRATOR_STARTS_TOTAL: &str = "vslab_orchestrator_starts_total";

/// Orchestrator: 컨테이너 정지 수 (counter, label: result)
pub const ORCHESTRATOR_STOPS_TOTAL: &str = "vslab_orchestrator_stops_total";

/// Orchestrator: 파기된 프로젝트 수 (counter, label: result)
pub const ORCHESTRATOR_DESTROYS_TOTAL: &str = "vslab_orchestrator_destroys_total";

/// Orchestrator: 기동 소요 시간 (histogram, 초)
pub const ORCHESTRATOR_START_DURATION_SECONDS: &str =
    "vslab_orchestrator_start_duration_seconds";

/// Orchestrator: 엔진과 기록이 어긋난 사건 수 (counter)
pub const ORCHESTRATOR_INCONSISTENCIES_TOTAL: &str =
    "vslab_orchestrator_inconsistencies_total";

// ─── Discovery 메트릭 ───────────────────────────────────────────────

/// Discovery: 포트 조회 시도 수 (counter)
pub const DISCOVERY_ATTEMPTS_TOTAL: &str = "vslab_discovery_attempts_total";

/// Discovery: 한도 내에 포트를 찾지 못한 횟수 (counter)
pub const DISCOVERY_TIMEOUTS_TOTAL: &str = "vslab_discovery_timeouts_total";

// ─── Keeper 메트릭 ──────────────────────────────────────────────────

/// Keeper: 활동 추적 중인 프로젝트 수 (gauge)
pub const KEEPER_TRACKED_PROJECTS: &str = "vslab_keeper_tracked_projects";

/// Keeper: 유휴 회수 시도 수 (counter, label: result)
pub const KEEPER_RECLAIMS_TOTAL: &str = "vslab_keeper_reclaims_total";

// ─── Control 메트릭 ─────────────────────────────────────────────────

/// Control: 처리된 제어 요청 수 (counter, labels: op, result)
pub const CONTROL_REQUESTS_TOTAL: &str = "vslab_control_requests_total";

/// Control: 현재 열린 제어 연결 수 (gauge)
pub const CONTROL_ACTIVE_CONNECTIONS: &str = "vslab_control_active_connections";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "vslab_daemon_uptime_seconds";

/// Daemon: 설정된 엔진 호스트 수 (gauge)
pub const DAEMON_ENGINE_HOSTS: &str = "vslab_daemon_engine_hosts";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "vslab_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 기동 소요 시간 히스토그램 버킷 (초)
///
/// 포트 발견 재시도를 포함하므로 100ms ~ 60s 범위
pub const START_DURATION_BUCKETS: [f64; 9] = [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출합니다. 일반적으로 `vslab-daemon`의
/// 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Orchestrator
    describe_counter!(
        ORCHESTRATOR_PROJECTS_RESERVED_TOTAL,
        "Total number of projects reserved"
    );
    describe_counter!(
        ORCHESTRATOR_STARTS_TOTAL,
        "Total number of container materialization attempts"
    );
    describe_counter!(
        ORCHESTRATOR_STOPS_TOTAL,
        "Total number of container stop operations"
    );
    describe_counter!(
        ORCHESTRATOR_DESTROYS_TOTAL,
        "Total number of project destroy operations"
    );
    describe_histogram!(
        ORCHESTRATOR_START_DURATION_SECONDS,
        "Time from create to recorded placement in seconds"
    );
    describe_counter!(
        ORCHESTRATOR_INCONSISTENCIES_TOTAL,
        "Total number of engine/record divergences reported"
    );

    // Discovery
    describe_counter!(
        DISCOVERY_ATTEMPTS_TOTAL,
        "Total number of published port queries"
    );
    describe_counter!(
        DISCOVERY_TIMEOUTS_TOTAL,
        "Total number of port discoveries that exhausted their attempts"
    );

    // Keeper
    describe_gauge!(
        KEEPER_TRACKED_PROJECTS,
        "Number of running projects tracked for idle reclamation"
    );
    describe_counter!(
        KEEPER_RECLAIMS_TOTAL,
        "Total number of idle reclamation attempts"
    );

    // Control
    describe_counter!(
        CONTROL_REQUESTS_TOTAL,
        "Total number of control socket requests handled"
    );
    describe_gauge!(
        CONTROL_ACTIVE_CONNECTIONS,
        "Number of open control socket connections"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "vslab daemon uptime in seconds");
    describe_gauge!(DAEMON_ENGINE_HOSTS, "Number of configured engine hosts");
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

//! Client-side integration tests.
//!
//! A fake daemon listens on a temporary Unix socket, records the request
//! lines it receives and answers with scripted responses.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

use vslab_cli::client::ControlClient;
use vslab_cli::commands::project::ProjectReport;
use vslab_cli::commands::status::build_status_report;
use vslab_cli::error::CliError;
use vslab_cli::resolve_location;
use vslab_core::pipeline::HealthStatus;
use vslab_core::protocol::{ControlRequest, ControlResponse, HostHealth, encode_line};
use vslab_core::types::{ImageKind, OwnerId, Project, ProjectId};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Answers each request line with the next scripted response.
struct FakeDaemon {
    socket: PathBuf,
    received: Arc<Mutex<Vec<ControlRequest>>>,
    _dir: tempfile::TempDir,
}

impl FakeDaemon {
    fn start(responses: Vec<ControlResponse>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("control.sock");
        let listener = UnixListener::bind(&socket).expect("bind fake daemon");
        let received = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&received);
        tokio::spawn(async move {
            let mut responses = responses.into_iter();
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (read_half, mut write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: ControlRequest =
                    serde_json::from_str(&line).expect("client sent valid request");
                log.lock().unwrap().push(request);
                let Some(response) = responses.next() else {
                    return;
                };
                let out = encode_line(&response).expect("encode");
                if write_half.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        });

        Self {
            socket,
            received,
            _dir: dir,
        }
    }

    fn path(&self) -> &Path {
        &self.socket
    }

    fn requests(&self) -> Vec<ControlRequest> {
        self.received.lock().unwrap().clone()
    }
}

fn sample_project() -> Project {
    Project {
        id: ProjectId::new(3),
        owner_id: OwnerId::new(8),
        name: "scratch".to_owned(),
        image_kind: ImageKind::Python3,
        placement: None,
    }
}

#[tokio::test]
async fn reserve_round_trip() {
    let daemon = FakeDaemon::start(vec![ControlResponse::Project {
        project: sample_project(),
    }]);

    let mut client = ControlClient::connect(daemon.path(), TIMEOUT)
        .await
        .expect("connect");
    let request = ControlRequest::Reserve {
        owner_id: OwnerId::new(8),
        name: "scratch".to_owned(),
        image_kind: ImageKind::Python3,
    };
    let response = client.call(&request).await.expect("call");

    match ProjectReport::from_response(response).expect("project report") {
        ProjectReport::Project { project } => assert_eq!(project, sample_project()),
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(daemon.requests(), vec![request]);
}

#[tokio::test]
async fn one_connection_carries_several_requests() {
    let daemon = FakeDaemon::start(vec![
        ControlResponse::Touched {
            project_id: ProjectId::new(3),
        },
        ControlResponse::Projects {
            projects: vec![sample_project()],
        },
    ]);

    let mut client = ControlClient::connect(daemon.path(), TIMEOUT)
        .await
        .expect("connect");
    let touched = client
        .call(&ControlRequest::Touch {
            project_id: ProjectId::new(3),
            owner_id: None,
        })
        .await
        .expect("touch");
    assert!(matches!(touched, ControlResponse::Touched { .. }));

    let listed = client
        .call(&ControlRequest::List { owner_id: None })
        .await
        .expect("list");
    assert!(matches!(listed, ControlResponse::Projects { ref projects } if projects.len() == 1));
    assert_eq!(daemon.requests().len(), 2);
}

#[tokio::test]
async fn daemon_error_maps_to_command_error() {
    let daemon = FakeDaemon::start(vec![ControlResponse::error(
        "forbidden",
        "project 3 is not owned by 1",
        false,
    )]);

    let mut client = ControlClient::connect(daemon.path(), TIMEOUT)
        .await
        .expect("connect");
    let err = client
        .call(&ControlRequest::Stop {
            project_id: ProjectId::new(3),
            owner_id: Some(OwnerId::new(1)),
        })
        .await
        .expect_err("forbidden must surface as an error");

    assert!(matches!(err, CliError::Command { ref kind, .. } if kind == "forbidden"));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn inconsistent_error_has_its_own_exit_code() {
    let daemon = FakeDaemon::start(vec![ControlResponse::error(
        "persist_failed",
        "container abc is running but the record was not updated",
        true,
    )]);

    let mut client = ControlClient::connect(daemon.path(), TIMEOUT)
        .await
        .expect("connect");
    let err = client
        .call(&ControlRequest::Start {
            project_id: ProjectId::new(3),
            owner_id: None,
        })
        .await
        .expect_err("inconsistent failure");

    assert!(matches!(err, CliError::Inconsistent { .. }));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn missing_socket_is_daemon_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ControlClient::connect(&dir.path().join("absent.sock"), TIMEOUT)
        .await
        .err()
        .expect("connect must fail");
    assert!(matches!(err, CliError::DaemonUnavailable(_)));
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn closed_connection_is_daemon_unavailable() {
    // No scripted responses: the fake daemon hangs up after the first line.
    let daemon = FakeDaemon::start(Vec::new());

    let mut client = ControlClient::connect(daemon.path(), TIMEOUT)
        .await
        .expect("connect");
    let err = client
        .call(&ControlRequest::Health)
        .await
        .expect_err("closed connection");
    assert!(matches!(err, CliError::DaemonUnavailable(_)));
}

#[tokio::test]
async fn status_includes_health_when_socket_answers() {
    let daemon = FakeDaemon::start(vec![ControlResponse::Health {
        overall: HealthStatus::Degraded("1 of 2 hosts unreachable".to_owned()),
        tracked_projects: 4,
        hosts: vec![
            HostHealth {
                host: "10.0.0.1".to_owned(),
                reachable: true,
                error: None,
            },
            HostHealth {
                host: "10.0.0.2".to_owned(),
                reachable: false,
                error: Some("timed out".to_owned()),
            },
        ],
    }]);
    let pid_dir = tempfile::tempdir().expect("tempdir");
    let pid_file = pid_dir.path().join("vslab.pid").display().to_string();

    let report = build_status_report(&pid_file, daemon.path(), TIMEOUT, true)
        .await
        .expect("status");

    assert!(report.daemon_running, "answering socket means running");
    assert_eq!(report.pid, None);
    let health = report.health.expect("health present");
    assert!(!health.healthy);
    assert_eq!(health.tracked_projects, 4);
    assert_eq!(health.reachable_hosts, 1);
    assert_eq!(health.total_hosts, 2);
    assert_eq!(health.hosts.len(), 2);
}

#[tokio::test]
async fn status_without_daemon_is_reported_not_failed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let pid_file = dir.path().join("vslab.pid").display().to_string();

    let report = build_status_report(&pid_file, &dir.path().join("absent.sock"), TIMEOUT, false)
        .await
        .expect("status should not fail when the daemon is down");

    assert!(!report.daemon_running);
    assert!(report.health.is_none());
    assert!(report.health_error.is_some());
}

#[tokio::test]
async fn socket_flag_wins_over_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("vslab.toml");
    std::fs::write(
        &config_path,
        r#"
[general]
pid_file = "/tmp/custom.pid"

[control]
socket_path = "/tmp/from-config.sock"
"#,
    )
    .expect("write config");

    let from_config = resolve_location(&config_path, None).await.expect("resolve");
    assert_eq!(from_config.socket_path, PathBuf::from("/tmp/from-config.sock"));
    assert_eq!(from_config.pid_file, "/tmp/custom.pid");

    let overridden = resolve_location(&config_path, Some(Path::new("/tmp/flag.sock")))
        .await
        .expect("resolve");
    assert_eq!(overridden.socket_path, PathBuf::from("/tmp/flag.sock"));
}

#[tokio::test]
async fn broken_config_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config_path = dir.path().join("vslab.toml");
    std::fs::write(&config_path, "[control\nsocket_path = 1").expect("write config");

    let err = resolve_location(&config_path, None)
        .await
        .expect_err("malformed TOML");
    assert_eq!(err.exit_code(), 2);
}

//! Configuration layering tests.
//!
//! The daemon resolves settings as file → environment → command line,
//! validating only after every layer is applied.

use std::io::Write;

use clap::Parser;
use serial_test::serial;
use vslab_core::config::VslabConfig;
use vslab_daemon::cli::DaemonCli;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
    file.write_all(contents.as_bytes())
        .expect("should write config");
    file
}

#[tokio::test]
#[serial]
async fn test_file_env_cli_precedence() {
    let file = write_config(
        r#"
[general]
log_level = "warn"
pid_file = "/tmp/from-file.pid"

[hosts]
addresses = ["10.0.0.1", "10.0.0.2"]

[store]
backend = "memory"
"#,
    );

    // SAFETY: serialized test, no other thread reads the environment
    unsafe {
        std::env::set_var("VSLAB_GENERAL_LOG_LEVEL", "debug");
        std::env::set_var("VSLAB_GENERAL_PID_FILE", "/tmp/from-env.pid");
    }

    let mut config = VslabConfig::from_file(file.path()).await.unwrap();
    config.apply_env_overrides();
    let cli = DaemonCli::parse_from(["vslab-daemon", "--pid-file", "/tmp/from-cli.pid"]);
    cli.apply_overrides(&mut config);

    unsafe {
        std::env::remove_var("VSLAB_GENERAL_LOG_LEVEL");
        std::env::remove_var("VSLAB_GENERAL_PID_FILE");
    }

    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.pid_file, "/tmp/from-cli.pid");
    assert_eq!(config.hosts.addresses, vec!["10.0.0.1", "10.0.0.2"]);
    config.validate().expect("layered config should validate");
}

#[tokio::test]
#[serial]
async fn test_cli_override_can_make_config_invalid() {
    let file = write_config("[store]\nbackend = \"memory\"\n");
    let mut config = VslabConfig::from_file(file.path()).await.unwrap();
    config.apply_env_overrides();
    let cli = DaemonCli::parse_from(["vslab-daemon", "--log-format", "xml"]);
    cli.apply_overrides(&mut config);
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn test_missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let result = VslabConfig::from_file(dir.path().join("absent.toml")).await;
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn test_serialized_defaults_round_trip_through_file() {
    let defaults = VslabConfig::default();
    let text = toml::to_string(&defaults).expect("defaults should serialize");
    let file = write_config(&text);
    let loaded = VslabConfig::from_file(file.path()).await.unwrap();
    assert_eq!(loaded.control.socket_path, defaults.control.socket_path);
    assert_eq!(loaded.keeper.idle_timeout_secs, 1800);
    assert_eq!(loaded.keeper.sweep_interval_secs, 60);
}

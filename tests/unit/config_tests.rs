//! Unit tests for configuration parsing, validation and derived settings.

use std::time::Duration;

use acp_host::acp::spawner::DEFAULT_LAUNCH_COMMAND;
use acp_host::{AppError, GlobalConfig};

/// An empty file yields the defaults.
#[test]
fn empty_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("empty config");

    assert_eq!(config, GlobalConfig::default());
    assert!(config.agent.auto_start);
    assert_eq!(config.agent.startup_timeout_seconds, 30);
    assert!(!config.permissions.auto_allow);
    assert_eq!(config.client.name, "acp-host");
    assert_eq!(config.launch_command(), DEFAULT_LAUNCH_COMMAND);
}

/// Every section parses.
#[test]
fn full_config_parses() {
    let dir = tempfile::tempdir().expect("tempdir");
    let toml = format!(
        r#"
[agent]
command = "my-agent"
args = ["--acp", "--verbose"]
cwd = '{}'
auto_start = false
startup_timeout_seconds = 5

[permissions]
auto_allow = true

[client]
name = "custom-host"
title = "Custom Host"
"#,
        dir.path().display()
    );

    let config = GlobalConfig::from_toml_str(&toml).expect("full config");
    assert_eq!(config.launch_command(), "my-agent --acp --verbose");
    assert!(!config.agent.auto_start);
    assert!(config.permissions.auto_allow);
    assert_eq!(config.client.title, "Custom Host");
    assert_eq!(
        config.agent.cwd.as_deref(),
        Some(dir.path().canonicalize().unwrap().as_path())
    );
}

/// `launch_command` wins over `command`.
#[test]
fn launch_command_takes_priority() {
    let config = GlobalConfig::from_toml_str(
        r#"
[agent]
launch_command = "npx some-agent --stdio"
command = "ignored"
"#,
    )
    .unwrap();
    assert_eq!(config.launch_command(), "npx some-agent --stdio");
}

#[test]
fn zero_startup_timeout_is_rejected() {
    let err = GlobalConfig::from_toml_str("[agent]\nstartup_timeout_seconds = 0\n")
        .expect_err("zero timeout must fail");
    match err {
        AppError::Config(msg) => assert!(msg.contains("startup_timeout_seconds"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn missing_cwd_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let toml = format!("[agent]\ncwd = '{}'\n", missing.display());

    match GlobalConfig::from_toml_str(&toml) {
        Err(AppError::Config(msg)) => assert!(msg.starts_with("agent.cwd invalid"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn invalid_toml_is_a_config_error() {
    let result = GlobalConfig::from_toml_str("[agent\nbroken");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().unwrap();
    match GlobalConfig::load_from_path(dir.path().join("config.toml")) {
        Err(AppError::Config(msg)) => assert!(msg.starts_with("failed to read config")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[permissions]\nauto_allow = true\n").unwrap();

    let config = GlobalConfig::load_from_path(&path).unwrap();
    assert!(config.permissions.auto_allow);
}

/// The supervisor configuration carries the resolved command, cwd, client
/// identity and timeout.
#[test]
fn supervisor_config_is_derived() {
    let dir = tempfile::tempdir().unwrap();
    let toml = format!(
        "[agent]\nlaunch_command = 'agent --acp'\ncwd = '{}'\nstartup_timeout_seconds = 7\n",
        dir.path().display()
    );
    let config = GlobalConfig::from_toml_str(&toml).unwrap();

    let supervisor = config.supervisor_config().unwrap();
    assert_eq!(supervisor.spawn.command, "agent --acp");
    assert_eq!(supervisor.spawn.cwd, dir.path().canonicalize().unwrap());
    assert_eq!(supervisor.startup_timeout, Duration::from_secs(7));
    assert!(supervisor.auto_start);
    assert_eq!(supervisor.retry.attempts, 3);
    assert_eq!(supervisor.initialize.protocol_version, 1);

    let client = supervisor.initialize.client_info.unwrap();
    assert_eq!(client.name, "acp-host");
    assert_eq!(client.version, env!("CARGO_PKG_VERSION"));
}

/// Without a configured cwd, the process cwd is used.
#[test]
fn cwd_defaults_to_current_dir() {
    let config = GlobalConfig::default();
    assert_eq!(config.cwd().unwrap(), std::env::current_dir().unwrap());
}

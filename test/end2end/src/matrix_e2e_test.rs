//! Matrix orchestrator end-to-end tests.
//!
//! Real server binaries are stand-ins here: shell commands that either emit
//! a handshake pointing at an in-process KV server, crash, or hang. That
//! exercises spawning, validation short-circuit, sibling isolation, and the
//! suite timeout without depending on built artifacts.

use std::time::Duration;

use anyhow::Result;
use serial_test::serial;
use tempfile::TempDir;

use crate::infra::TestInfrastructure;
use crosswire_matrix::{CellStatus, MatrixConfig, MatrixRunner, RuntimeSpec, Scenario};
use crosswire_wire_protocol::{CryptoConfig, TlsMode};

fn sh(script: String) -> Vec<String> {
    vec!["/bin/sh".to_string(), "-c".to_string(), script]
}

/// A stand-in server command that immediately advertises the given address.
fn echo_server(address: &str) -> Vec<String> {
    sh(format!(
        "echo '1|1|tcp|{address}|tarpc-postcard|'; sleep 30"
    ))
}

#[tokio::test]
#[serial]
async fn incompatible_cell_short_circuits_without_spawning() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;

    // The go-legacy stand-in would leave a marker file if it ever ran.
    let marker_dir = TempDir::new()?;
    let marker = marker_dir.path().join("spawned");

    let servers = vec![
        RuntimeSpec {
            name: "rust".to_string(),
            server_command: echo_server(&infra.handshake.address),
            client_command: None,
        },
        RuntimeSpec {
            name: "go-legacy".to_string(),
            server_command: sh(format!("touch {}; sleep 30", marker.display())),
            client_command: None,
        },
    ];
    let clients = vec![RuntimeSpec {
        name: "rust".to_string(),
        server_command: Vec::new(),
        client_command: None,
    }];

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = vec![CryptoConfig::EC_P521];
    config.tls_mode = TlsMode::Disabled;
    config.scenarios = vec![Scenario::BasicPutGet];
    config.suite_timeout = Duration::from_secs(60);

    let report = MatrixRunner::new(config).run().await;
    assert_eq!(report.results.len(), 2);

    let rust_cell = &report.results[0];
    assert_eq!(rust_cell.cell.server_runtime, "rust");
    assert_eq!(rust_cell.status, CellStatus::Passed);

    let legacy_cell = &report.results[1];
    assert_eq!(legacy_cell.cell.server_runtime, "go-legacy");
    assert_eq!(legacy_cell.status, CellStatus::Skipped);
    let detail = legacy_cell.error_detail.as_deref().unwrap();
    assert!(detail.contains("incompatible pairing"), "detail: {detail}");
    assert!(detail.contains("secp521r1"), "detail: {detail}");

    // Skipping happened before any resource allocation: zero processes.
    assert!(!marker.exists(), "validator failed to short-circuit");
    // A skipped sibling never fails the suite.
    assert!(!report.any_failed());

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn crashing_cell_does_not_abort_siblings() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;

    let servers = vec![
        RuntimeSpec {
            name: "rust".to_string(),
            server_command: echo_server(&infra.handshake.address),
            client_command: None,
        },
        RuntimeSpec {
            name: "crashing".to_string(),
            server_command: sh("echo 'segfault imminent' >&2; exit 3".to_string()),
            client_command: None,
        },
    ];
    let clients = vec![RuntimeSpec {
        name: "rust".to_string(),
        server_command: Vec::new(),
        client_command: None,
    }];

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = vec![CryptoConfig::EC_P256];
    config.tls_mode = TlsMode::Disabled;
    config.scenarios = vec![Scenario::BasicPutGet];
    config.workers = 2;
    config.suite_timeout = Duration::from_secs(60);

    let report = MatrixRunner::new(config).run().await;
    assert_eq!(report.results.len(), 2);

    let passed = &report.results[0];
    assert_eq!(passed.status, CellStatus::Passed, "{:?}", passed);

    let crashed = &report.results[1];
    assert_eq!(crashed.status, CellStatus::Failed);
    let detail = crashed.error_detail.as_deref().unwrap();
    assert!(detail.contains("harness_crash"), "detail: {detail}");
    assert!(detail.contains("segfault imminent"), "detail: {detail}");

    assert!(report.any_failed());

    infra.cleanup().await;
    Ok(())
}

#[tokio::test]
#[serial]
async fn forced_run_attempts_known_bad_pairing() -> Result<()> {
    let servers = vec![RuntimeSpec {
        name: "go-legacy".to_string(),
        server_command: sh("exit 7".to_string()),
        client_command: None,
    }];
    let clients = vec![RuntimeSpec {
        name: "rust".to_string(),
        server_command: Vec::new(),
        client_command: None,
    }];

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = vec![CryptoConfig::EC_P521];
    config.tls_mode = TlsMode::Disabled;
    config.scenarios = vec![Scenario::BasicPutGet];
    config.force = true;
    config.suite_timeout = Duration::from_secs(60);

    let report = MatrixRunner::new(config).run().await;
    assert_eq!(report.results.len(), 1);
    // Forced past the validator: the cell really ran (and failed), rather
    // than being skipped.
    assert_eq!(report.results[0].status, CellStatus::Failed);
    Ok(())
}

#[tokio::test]
#[serial]
async fn suite_timeout_marks_unfinished_cells() -> Result<()> {
    let servers = vec![RuntimeSpec {
        name: "rust".to_string(),
        // Never prints a handshake, never exits.
        server_command: sh("sleep 30".to_string()),
        client_command: None,
    }];
    let clients = vec![RuntimeSpec {
        name: "rust".to_string(),
        server_command: Vec::new(),
        client_command: None,
    }];

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = vec![CryptoConfig::EC_P256];
    config.tls_mode = TlsMode::Disabled;
    config.scenarios = vec![Scenario::BasicPutGet];
    config.startup_timeout = Duration::from_secs(20);
    config.suite_timeout = Duration::from_millis(500);

    let report = MatrixRunner::new(config).run().await;
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, CellStatus::TimedOut);
    assert!(report.any_failed());
    Ok(())
}

#[tokio::test]
#[serial]
async fn external_client_harness_is_judged_by_exit_status() -> Result<()> {
    let infra =
        TestInfrastructure::setup(TlsMode::Disabled, CryptoConfig::EC_P256, false).await?;

    let servers = vec![RuntimeSpec {
        name: "rust".to_string(),
        server_command: echo_server(&infra.handshake.address),
        client_command: None,
    }];
    // The external "client harness" just checks it was handed an endpoint.
    let clients = vec![RuntimeSpec {
        name: "shell".to_string(),
        server_command: Vec::new(),
        client_command: Some(sh(
            "[ -n \"$CROSSWIRE_ENDPOINT\" ] && [ \"$CROSSWIRE_NETWORK\" = tcp ]".to_string(),
        )),
    }];

    let mut config = MatrixConfig::new(clients, servers);
    config.cryptos = vec![CryptoConfig::EC_P256];
    config.tls_mode = TlsMode::Disabled;
    config.scenarios = vec![Scenario::BasicPutGet];
    config.suite_timeout = Duration::from_secs(60);

    let report = MatrixRunner::new(config).run().await;
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].status, CellStatus::Passed);

    infra.cleanup().await;
    Ok(())
}

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::HashSet;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn relay() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("batch-relay").unwrap();
    // Keep the developer's environment out of the config under test.
    cmd.env_remove("BATCH_RELAY_PRIMARY_RPC_URL")
        .env_remove("BATCH_RELAY_FALLBACK_RPC_URL")
        .env_remove("BATCH_RELAY_POLL_INTERVAL_SECS");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    relay()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_simulate_forwards_every_batch_once_across_failover() {
    let output = relay()
        .args([
            "simulate",
            "--batches",
            "3",
            "--sever-primary-after",
            "1",
            "--duration-secs",
            "5",
        ])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).unwrap();
    let ids: Vec<String> = stdout
        .lines()
        .map(|line| {
            let json: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(json["tx_hash"].as_str().unwrap().starts_with("0x"), "{line}");
            json["batch_identifier"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 3);
}

#[test]
fn test_simulate_connects_to_overridden_endpoint() {
    relay()
        .env("BATCH_RELAY_PRIMARY_RPC_URL", "wss://primary.override.test")
        .env_remove("RUST_LOG")
        .args(["simulate", "--batches", "1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("wss://primary.override.test"));
}

#[test]
fn test_simulate_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("relay.json");
    std::fs::write(&config_path, r#"{"poll_interval_secs": 0}"#).unwrap();

    relay()
        .arg("--config")
        .arg(&config_path)
        .args(["simulate", "--batches", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll_interval_secs"));
}

#[test]
fn test_simulate_rejects_bad_env_override() {
    relay()
        .env("BATCH_RELAY_POLL_INTERVAL_SECS", "often")
        .args(["simulate", "--batches", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BATCH_RELAY_POLL_INTERVAL_SECS"));
}

#[test]
fn test_verify_rejects_short_merkle_root() {
    let mut batch = NamedTempFile::new().unwrap();
    batch.write_all(b"batch bytes").unwrap();

    relay()
        .arg("verify")
        .arg("--batch")
        .arg(batch.path())
        .args(["--merkle-root", "0xdeadbeef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("32 bytes"));
}

#[test]
fn test_verify_reports_missing_batch_file() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.bin");

    relay()
        .arg("verify")
        .arg("--batch")
        .arg(&missing)
        .args(["--merkle-root", &"ab".repeat(32)])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope.bin"));
}

#[cfg(not(feature = "native"))]
#[test]
fn test_verify_without_native_library_fails_cleanly() {
    let mut batch = NamedTempFile::new().unwrap();
    batch.write_all(b"batch bytes").unwrap();

    relay()
        .arg("verify")
        .arg("--batch")
        .arg(batch.path())
        .args(["--merkle-root", &format!("0x{}", "00".repeat(32))])
        .assert()
        .failure()
        .stderr(predicate::str::contains("native"));
}

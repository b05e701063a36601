// SPDX-License-Identifier: MIT OR Apache-2.0
//! Black-box integration tests for the `claw` binary.
//!
//! Everything here runs hermetically: no node is serving, no network is
//! touched, and all state lives in per-test temp directories.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn claw() -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("claw").expect("binary `claw` should be built");
    // Ambient ClawSats variables must not leak into the tests.
    cmd.env_remove("CLAWSATS_CONFIG_PATH")
        .env_remove("CLAWSATS_ROOT_KEY_HEX")
        .env_remove("CLAWSATS_DIRECTORY_URL")
        .env_remove("CLAWSATS_DIRECTORY_REGISTER_URL");
    cmd
}

/// `claw create` into a temp dir; returns the config path.
fn created_config(dir: &Path) -> String {
    let config = dir.join("wallet-config.json").display().to_string();
    claw()
        .args(["create", "--claw-id", "test-claw", "--config", &config])
        .assert()
        .success();
    config
}

// ── 1. Help and version ─────────────────────────────────────────────

#[test]
fn help_exits_zero_and_lists_subcommands() {
    claw()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ClawSats node operator CLI"))
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("brain"));
}

#[test]
fn help_short_flag_works() {
    claw()
        .arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("ClawSats node operator CLI"));
}

#[test]
fn version_shows_version_string() {
    claw()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn unknown_subcommand_fails() {
    claw().arg("frobnicate").assert().failure();
}

// ── 2. create ───────────────────────────────────────────────────────

#[test]
fn create_writes_config_and_prints_identity() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config_path = tmp.path().join("wallet-config.json");

    let assert = claw()
        .args([
            "create",
            "--claw-id",
            "alpha",
            "--config",
            config_path.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("identity: "));

    // The printed identity is a 66-hex compressed key.
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let identity = stdout
        .lines()
        .find_map(|l| l.strip_prefix("identity: "))
        .expect("identity line")
        .trim();
    assert_eq!(identity.len(), 66);
    assert!(identity.starts_with("02") || identity.starts_with("03"));

    // The config landed with the key material and owner-only permissions.
    let content = std::fs::read_to_string(&config_path).expect("read config");
    let json: serde_json::Value = serde_json::from_str(&content).expect("parse config JSON");
    assert_eq!(json["clawId"], "alpha");
    assert_eq!(json["rootKeyHex"].as_str().unwrap().len(), 64);
    assert_eq!(json["identityKey"], identity);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&config_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn create_refuses_to_overwrite() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    claw()
        .args(["create", "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

// ── 3. config ───────────────────────────────────────────────────────

#[test]
fn config_output_is_redacted() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());

    let assert = claw()
        .args(["config", "--config", &config])
        .assert()
        .success()
        .stdout(predicate::str::contains("test-claw"));
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(
        !stdout.contains("rootKeyHex"),
        "root key material must never reach config output"
    );
}

// ── 4. share ────────────────────────────────────────────────────────

#[test]
fn share_without_destination_prints_signed_invitation() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());

    let assert = claw()
        .args(["share", "--config", &config])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let invitation: serde_json::Value =
        serde_json::from_str(&stdout).expect("invitation is JSON");
    assert_eq!(invitation["protocol"], "clawsats-invite");
    assert_eq!(invitation["sender"]["clawId"], "test-claw");
    assert_eq!(invitation["nonce"].as_str().unwrap().len(), 32);
    assert!(!invitation["signature"].as_str().unwrap().is_empty());
}

// ── 5. brain queue operations ───────────────────────────────────────

#[test]
fn brain_enqueue_jobs_and_why_round_trip() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    let data_root = tmp.path().to_str().unwrap().to_string();

    let assert = claw()
        .args([
            "brain",
            "enqueue",
            "--capability",
            "echo",
            "--params",
            r#"{"message":"hi"}"#,
            "--config",
            &config,
            "--data-root",
            &data_root,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("enqueued "));
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let job_id = stdout.trim().strip_prefix("enqueued ").expect("job id").to_string();

    claw()
        .args(["brain", "jobs", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains(&job_id))
        .stdout(predicate::str::contains("pending"))
        .stdout(predicate::str::contains("echo"));

    claw()
        .args(["brain", "what-next", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains(&job_id));

    claw()
        .args(["brain", "why", &job_id, "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains("enqueued"))
        .stdout(predicate::str::contains("echo"));

    claw()
        .args(["brain", "status", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\": 1"));

    // Nothing has failed, so nothing requeues.
    claw()
        .args(["brain", "retry-failed", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains("requeued 0"));
}

#[test]
fn brain_why_unknown_job_fails() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    claw()
        .args([
            "brain",
            "why",
            "no-such-job",
            "--config",
            &config,
            "--data-root",
            tmp.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no job"));
}

// ── 6. brain policy show/set ────────────────────────────────────────

#[test]
fn brain_policy_shows_defaults_and_set_persists() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    let data_root = tmp.path().to_str().unwrap().to_string();

    claw()
        .args(["brain", "policy", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hireEnabled\": true"))
        .stdout(predicate::str::contains("\"autoHireMaxSats\": 100"));

    // A deep-merge update overwrites the named scalar and nothing else.
    claw()
        .args([
            "brain",
            "policy",
            "--set",
            r#"{"decisions":{"autoHireMaxSats":250}}"#,
            "--config",
            &config,
            "--data-root",
            &data_root,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"autoHireMaxSats\": 250"))
        .stdout(predicate::str::contains("\"hireEnabled\": true"));

    // The update survived to the policy file.
    claw()
        .args(["brain", "policy", "--config", &config, "--data-root", &data_root])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"autoHireMaxSats\": 250"));
}

#[test]
fn brain_policy_set_rejects_non_objects() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    claw()
        .args([
            "brain",
            "policy",
            "--set",
            "42",
            "--config",
            &config,
            "--data-root",
            tmp.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON object"));
}

// ── 7. earn and watch ───────────────────────────────────────────────

#[test]
fn earn_with_no_events_says_so() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    claw()
        .args(["earn", "--data-root", tmp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("no paid calls recorded yet"));
}

#[test]
fn watch_with_empty_list_prints_hint() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    claw()
        .args([
            "watch",
            "--config",
            &config,
            "--data-root",
            tmp.path().to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("watch list is empty"));
}

#[test]
fn watch_add_rejects_private_endpoints() {
    let tmp = tempfile::tempdir().expect("create temp dir");
    let config = created_config(tmp.path());
    claw()
        .args([
            "watch",
            "--add",
            "http://127.0.0.1:3321",
            "--config",
            &config,
            "--data-root",
            tmp.path().to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a public http(s) URL"));
}

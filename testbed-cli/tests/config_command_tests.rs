//! Integration tests for `testbed config` command.
//!
//! Drives the real binary against TOML files in a temporary directory.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn testbed(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_testbed"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("should spawn testbed binary")
}

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("testbed.toml");
    fs::write(&path, body).expect("should write config");
    path
}

#[test]
fn test_config_validate_bundled_example() {
    // Given: the example configuration shipped at the repository root
    let example = Path::new(env!("CARGO_MANIFEST_DIR")).join("../testbed.toml.example");

    // When
    let output = testbed(&example, &["config", "validate", "--output", "json"]);

    // Then
    assert!(output.status.success(), "example config should validate");
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["valid"], true);
    assert_eq!(report["units"], 5);
    assert_eq!(report["environments"], 1);
}

#[test]
fn test_config_validate_malformed_toml_exits_2() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_config(&dir, "[general\nlog_level = \"info\"\n");

    let output = testbed(&path, &["config", "validate"]);

    assert_eq!(output.status.code(), Some(2), "invalid config should exit 2");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("INVALID"));
}

#[test]
fn test_config_validate_reports_prerequisite_cycle() {
    // Given: a -> b -> a
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_config(
        &dir,
        r#"
[[units]]
name = "a"
env = "e"
prereq = "b"
command = ["true"]

[[units]]
name = "b"
env = "e"
prereq = "a"
command = ["true"]
"#,
    );

    // When
    let output = testbed(&path, &["config", "validate", "--output", "json"]);

    // Then
    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(report["valid"], false);
    let error = report["errors"][0].as_str().expect("error string");
    assert!(error.contains("cycle"), "error should name the cycle: {error}");
}

#[test]
fn test_config_show_single_section() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write_config(&dir, "[lock]\nmax_reclaim_attempts = 9\n");

    let output = testbed(&path, &["config", "show", "--section", "lock"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("max_reclaim_attempts = 9"));
    assert!(!stdout.contains("log_level"));
}

#[test]
fn test_missing_config_file_exits_2() {
    let dir = TempDir::new().expect("should create temp dir");
    let missing = dir.path().join("absent.toml");

    let output = testbed(&missing, &["list"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.toml"), "stderr should name the file: {stderr}");
}

//! Command-line behavior that needs no external tools

use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn launchpad(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_launchpad"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("LAUNCHPAD_DELIVERY_REPO")
        .env_remove("LAUNCHPAD_BUILDER")
        .env_remove("LAUNCHPAD_DATA_DIR")
        .output()
        .expect("failed to run launchpad")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_templates_are_listed() {
    let dir = TempDir::new().unwrap();
    let output = launchpad(dir.path(), &["templates"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for id in ["go-service", "python-service", "collector"] {
        assert!(text.contains(id), "missing {id} in {text}");
    }
}

#[test]
fn test_empty_store_lists_nothing() {
    let dir = TempDir::new().unwrap();
    let output = launchpad(dir.path(), &["list"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("No services"));
}

#[test]
fn test_invalid_request_creates_nothing() {
    let dir = TempDir::new().unwrap();

    let output = launchpad(dir.path(), &["create", "go-service", r#"{"port": 8080}"#]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("service_name is required"));

    let output = launchpad(
        dir.path(),
        &["create", "go-service", r#"{"service_name": "demo", "port": 70000}"#],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Validation failed"));

    let output = launchpad(dir.path(), &["create", "go-service", "not json"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid service configuration"));

    // Nothing was registered and no sources were generated
    let output = launchpad(dir.path(), &["list", "--all"]);
    assert!(stdout(&output).contains("No services"));
    assert!(!dir.path().join("apps").exists());
}

#[test]
fn test_unknown_service_id_fails() {
    let dir = TempDir::new().unwrap();
    for args in [
        &["logs", "missing"][..],
        &["pause", "missing"][..],
        &["retry", "missing"][..],
    ] {
        let output = launchpad(dir.path(), args);
        assert!(!output.status.success(), "{args:?} should fail");
    }
}

#[test]
fn test_missing_settings_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let output = launchpad(
        dir.path(),
        &["--config", "/nonexistent/launchpad.yaml", "list"],
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to load settings"));
}

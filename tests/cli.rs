//! End-to-end tests for the `dr-wandb` binary.

use std::path::Path;

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;

use dr_wandb::model::{JsonObject, Run, RunState};
use dr_wandb::storage::RunStore;

fn obj(value: Value) -> JsonObject {
    value.as_object().unwrap().clone()
}

/// A `dr-wandb` command isolated from the caller's environment.
fn cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("dr-wandb").unwrap();
    cmd.env("HOME", home)
        .env("NETRC", home.join(".netrc"))
        .env_remove("DR_WANDB_DB")
        .env_remove("DR_WANDB_ENTITY")
        .env_remove("DR_WANDB_PROJECT")
        .env_remove("DR_WANDB_OUTPUT_DIR")
        .env_remove("WANDB_API_KEY")
        .env_remove("WANDB_BASE_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn seed(db: &Path) {
    let mut store = RunStore::open(db).unwrap();

    let mut done = Run::new("run-a", "alpha", RunState::Finished, "team", "proj");
    done.config = obj(json!({"lr": 0.01}));
    done.summary = obj(json!({"loss": 0.2}));
    store.store_run(&done).unwrap();
    store
        .store_history(
            "run-a",
            vec![
                obj(json!({"_step": 0, "loss": 1.0})),
                obj(json!({"_step": 1, "loss": 0.2})),
            ],
        )
        .unwrap();

    let live = Run::new("run-b", "beta", RunState::Running, "team", "proj");
    store.store_run(&live).unwrap();
}

fn stdout_lines(output: &std::process::Output) -> Vec<Value> {
    String::from_utf8(output.stdout.clone())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn test_version_json() {
    let home = TempDir::new().unwrap();
    let output = cmd(home.path()).args(["--json", "version"]).output().unwrap();
    assert!(output.status.success());

    let lines = stdout_lines(&output);
    assert_eq!(lines[0]["name"], "dr-wandb");
    assert_eq!(lines[0]["version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn test_unknown_filter_key_is_contract_violation() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("missing.db");

    let output = cmd(home.path())
        .args(["--db"])
        .arg(&db)
        .args(["runs", "--filter", "run_name=alpha"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "INVALID_FILTER");
    assert_eq!(err["error"]["contract_violation"], true);
    // Rejected before the database is opened.
    assert!(!db.exists());
}

#[test]
fn test_invalid_include_is_rejected() {
    let home = TempDir::new().unwrap();
    let output = cmd(home.path())
        .args(["runs", "--include", "all,config"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn test_missing_database() {
    let home = TempDir::new().unwrap();
    let output = cmd(home.path())
        .arg("--db")
        .arg(home.path().join("nope.db"))
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_download_requires_identifiers() {
    let home = TempDir::new().unwrap();
    let output = cmd(home.path())
        .args(["download", "--entity", "team"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "MISSING_IDENTIFIER");
}

#[test]
fn test_download_requires_api_key() {
    let home = TempDir::new().unwrap();
    let output = cmd(home.path())
        .args(["download", "--entity", "team", "--project", "proj"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    let err: Value = serde_json::from_slice(&output.stderr).unwrap();
    assert_eq!(err["error"]["code"], "UNAUTHORIZED");
}

#[test]
fn test_runs_prints_filtered_json_lines() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("wandb.db");
    seed(&db);

    let output = cmd(home.path())
        .arg("--db")
        .arg(&db)
        .args(["runs", "--filter", "state=finished", "--include", "summary"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let runs = stdout_lines(&output);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0]["run_id"], "run-a");
    assert_eq!(runs[0]["summary"]["loss"], 0.2);
    assert!(runs[0].get("config").is_none());
}

#[test]
fn test_status_counts() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("wandb.db");
    seed(&db);

    let output = cmd(home.path())
        .arg("--db")
        .arg(&db)
        .args(["--json", "status"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let status = &stdout_lines(&output)[0];
    assert_eq!(status["runs"], 2);
    assert_eq!(status["history_entries"], 2);
}

#[test]
fn test_export_writes_parquet_files() {
    let home = TempDir::new().unwrap();
    let db = home.path().join("wandb.db");
    let out = home.path().join("exports");
    seed(&db);

    let output = cmd(home.path())
        .arg("--db")
        .arg(&db)
        .arg("export")
        .arg("--output-dir")
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());

    let result = &stdout_lines(&output)[0];
    assert_eq!(result["stats"]["runs"], 2);
    assert_eq!(result["stats"]["history_entries"], 2);
    assert!(out.join("runs_metadata.parquet").exists());
    assert!(out.join("runs_history.parquet").exists());
    assert!(out.join("runs_metadata_config.parquet").exists());
    assert!(!out.join("runs_metadata_sweep_info.parquet").exists());
}

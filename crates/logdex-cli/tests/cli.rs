//! Binary-level tests for the `logdex` command.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const APP_LOG: &str = "\
04 Jul 2022 10:00:00,000 INFO  [core] Main:? - service started
04 Jul 2022 10:00:01,000 ERROR [core] Main:? - write failed with java.io.IOException: disk full
\tat Main.write(Main.java:10)
04 Jul 2022 10:00:02,000 WARN  [net] Client:? - retrying
04 Jul 2022 10:00:03,000 INFO  [net] Client:? - still open
";

fn logdex(logs: &Path, index: &Path) -> Command {
    let mut cmd = Command::cargo_bin("logdex").expect("binary built");
    cmd.arg("--log-dir").arg(logs).arg("--index-dir").arg(index);
    cmd.env_remove("LOGDEX_LOG_DIR").env_remove("LOGDEX_INDEX_DIR");
    cmd
}

fn indexed() -> (TempDir, TempDir) {
    let logs = TempDir::new().expect("create temp dir");
    let index = TempDir::new().expect("create temp dir");
    fs::write(logs.path().join("app.log"), APP_LOG).expect("write log");

    logdex(logs.path(), index.path())
        .arg("index")
        .assert()
        .success()
        .stdout(predicate::str::contains("State:    READY"))
        .stdout(predicate::str::contains("Entries:  3"));
    (logs, index)
}

// ============================================================================
// Indexing
// ============================================================================

#[test]
fn test_index_then_list_files_as_json() {
    let (logs, index) = indexed();

    let output = logdex(logs.path(), index.path())
        .args(["files", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let files: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(files[0]["name"], "app.log");
    assert_eq!(files[0]["levels"], serde_json::json!(["INFO", "WARN", "ERROR"]));
}

#[test]
fn test_rebuild_reports_same_entries() {
    let (logs, index) = indexed();

    logdex(logs.path(), index.path())
        .arg("rebuild")
        .assert()
        .success()
        .stdout(predicate::str::contains("Entries:  3"));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_search_by_level_and_exception() {
    let (logs, index) = indexed();

    logdex(logs.path(), index.path())
        .args(["search", "--sorted", "--level", "error", "--exception", "IOException"])
        .assert()
        .success()
        .stdout(predicate::str::contains("disk full"))
        .stdout(predicate::str::contains("retrying").not());
}

#[test]
fn test_levels_histogram() {
    let (logs, index) = indexed();

    logdex(logs.path(), index.path())
        .args(["levels", "--format", "json", "--module", "net"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"WARN\": 1"))
        .stdout(predicate::str::contains("ERROR").not());
}

#[test]
fn test_show_unknown_file_fails() {
    let (logs, index) = indexed();

    logdex(logs.path(), index.path())
        .args(["show", "missing.log", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("file not indexed: missing.log"));
}

#[test]
fn test_show_first_entry() {
    let (logs, index) = indexed();

    logdex(logs.path(), index.path())
        .args(["show", "app.log", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("service started"));
}

#[test]
fn test_query_without_index_fails() {
    let logs = TempDir::new().expect("create temp dir");
    let index = TempDir::new().expect("create temp dir");
    fs::write(logs.path().join("app.log"), APP_LOG).expect("write log");

    logdex(logs.path(), index.path())
        .arg("files")
        .assert()
        .failure()
        .stderr(predicate::str::contains("document index missing"));
}

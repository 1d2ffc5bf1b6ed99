//! CLI test cases.
//!
//! These run the real binary against the `local` store, the `echo` OCR engine
//! and the `log` notifier, so they need no network access or credentials.

use std::{fs, path::Path};

use assert_cmd::Command;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("ocr-relay").unwrap()
}

/// A `run` command wired to a local store rooted at `root`.
fn local_run(root: &Path) -> Command {
    let mut cmd = cmd();
    cmd.env("STORE_BACKEND", "local")
        .env("LOCAL_STORE_ROOT", root)
        .env("INPUT_CONTAINER", "input")
        .env("OUTPUT_CONTAINER", "output")
        .env("OCR_ENGINE", "echo")
        .env("NOTIFIER", "log")
        .env("POLL_INTERVAL_SECS", "1")
        .arg("run");
    cmd
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema() {
    for schema_type in ["TriggerEvent", "RecognitionDocument", "PipelineOutcome"] {
        cmd()
            .arg("schema")
            .arg(schema_type)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"$schema\""));
    }
}

#[test]
fn test_run_stores_document_and_reports_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("input")).unwrap();
    fs::write(
        root.join("input/invoice.png"),
        "Total: 42\nDate: 2024-01-01\n",
    )
    .unwrap();
    fs::write(root.join("input/empty.png"), "").unwrap();
    let events = root.join("events.jsonl");
    fs::write(
        &events,
        concat!(
            "{\"name\": \"input/invoice.png\", \"length\": 27}\n",
            "this is not json\n",
            "{\"name\": \"input/empty.png\", \"length\": 0}\n",
        ),
    )
    .unwrap();
    let outcomes = root.join("outcomes.jsonl");

    local_run(root)
        .arg(&events)
        .arg("-o")
        .arg(&outcomes)
        .assert()
        .success();

    let document = fs::read_to_string(root.join("output/invoice.json")).unwrap();
    assert_eq!(
        document,
        "{\n  \"filename\": \"invoice.png\",\n  \"lines\": [\n    \"Total: 42\",\n    \"Date: 2024-01-01\"\n  ]\n}"
    );
    assert!(!root.join("output/empty.json").exists());

    // Outcomes may be written in any order.
    let outcomes = fs::read_to_string(&outcomes).unwrap();
    let mut records = outcomes
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap())
        .collect::<Vec<_>>();
    records.sort_by_key(|record| record["name"].as_str().unwrap().to_owned());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["name"], "input/empty.png");
    assert_eq!(records[0]["status"], "failure");
    assert_eq!(records[0]["stage"], "submit");
    assert_eq!(records[1]["name"], "input/invoice.png");
    assert_eq!(records[1]["status"], "success");
    assert_eq!(
        records[1]["output_location"],
        serde_json::json!({"container": "output", "name": "invoice.json"})
    );
}

#[test]
fn test_run_reads_events_from_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("input")).unwrap();
    fs::write(root.join("input/note.txt"), "hello\u{c}world\n").unwrap();

    local_run(root)
        .write_stdin("{\"name\": \"note.txt\", \"length\": 12}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\":\"success\""));

    let document = fs::read_to_string(root.join("output/note.json")).unwrap();
    let document: serde_json::Value = serde_json::from_str(&document).unwrap();
    assert_eq!(
        document,
        serde_json::json!({"filename": "note.txt", "lines": ["hello", "world"]})
    );
}

#[test]
fn test_missing_configuration_fails_before_processing() {
    let dir = tempfile::tempdir().unwrap();
    local_run(dir.path())
        .env("OCR_ENGINE", "azure-read")
        .env_remove("VISION_ENDPOINT")
        .env_remove("VISION_KEY")
        .write_stdin("{\"name\": \"a.png\", \"length\": 1}\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("VISION_ENDPOINT"));
}

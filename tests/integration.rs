use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn engram_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("engram");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let config_content = format!(
        r#"[storage]
path = "{root}/data/engram.sqlite"

[docs]
output_dir = "{root}/docs"
format = "md"

[sync]
conflict_strategy = "graph-wins"

[[schema.nodes]]
label = "Service"

[schema.nodes.properties.name]
kind = "string"
required = true

[schema.nodes.properties.status]
kind = "enum"
values = ["active", "deprecated"]
default = "active"

[schema.nodes.properties.description]
kind = "string"

[schema.nodes.properties.content]
kind = "string"

[schema.nodes.properties.replicas]
kind = "number"

[schema.nodes.properties.tags]
kind = "string_list"

[[schema.nodes]]
label = "File"

[schema.nodes.properties.name]
kind = "string"

[schema.nodes.properties.path]
kind = "string"

[[schema.edges]]
type = "DEPENDS_ON"
from = "Service"
to = "Service"

[[schema.edges]]
type = "IMPORTS"
from = "File"
to = "File"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("engram.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_engram(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = engram_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run engram binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn upsert(config_path: &Path, label: &str, id: Option<&str>, props: &str, actor: &str) -> Value {
    let mut args = vec!["--actor", actor, "upsert", "--label", label, "--props", props];
    if let Some(id) = id {
        args.push("--id");
        args.push(id);
    }
    let (stdout, stderr, success) = run_engram(config_path, &args);
    assert!(success, "upsert failed: stdout={stdout}, stderr={stderr}");
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_engram(&config_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_engram(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_engram(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_first_write_creates_version_one() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let outcome = upsert(
        &config_path,
        "Service",
        None,
        r#"{"name":"Auth","status":"active"}"#,
        "alice",
    );
    assert_eq!(outcome["version"], 1);
    assert_eq!(outcome["created"], true);
    let id = outcome["id"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_engram(&config_path, &["query", "--id", &id]);
    assert!(success);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(view["state"]["props"]["name"], "Auth");
    assert_eq!(view["state"]["props"]["status"], "active");

    let (stdout, _, success) = run_engram(&config_path, &["audit", "--id", &id]);
    assert!(success);
    let entries: Value = serde_json::from_str(&stdout).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "create");
    assert_eq!(entries[0]["actor"], "alice");
}

#[test]
fn test_version_chain_and_diff() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let outcome = upsert(
        &config_path,
        "Service",
        None,
        r#"{"name":"Auth","status":"active"}"#,
        "alice",
    );
    let id = outcome["id"].as_str().unwrap().to_string();

    let outcome = upsert(
        &config_path,
        "Service",
        Some(&id),
        r#"{"name":"Auth","status":"deprecated"}"#,
        "alice",
    );
    assert_eq!(outcome["version"], 2);
    assert_eq!(outcome["created"], false);

    let (stdout, _, success) = run_engram(&config_path, &["history", "--id", &id]);
    assert!(success);
    let history: Value = serde_json::from_str(&stdout).unwrap();
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    // Newest first
    assert_eq!(history[0]["version"], 2);
    assert_eq!(history[1]["version"], 1);
    // Exactly one head state
    assert!(history[0].get("valid_to").is_none());
    assert!(history[1].get("valid_to").is_some());

    let (stdout, _, success) = run_engram(
        &config_path,
        &["diff", "--id", &id, "--from", "1", "--to", "2"],
    );
    assert!(success);
    let diff: Value = serde_json::from_str(&stdout).unwrap();
    let changes = diff["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0]["property"], "status");
    assert_eq!(changes[0]["old"], "active");
    assert_eq!(changes[0]["new"], "deprecated");

    let (stdout, _, success) = run_engram(&config_path, &["changelog", "--id", &id]);
    assert!(success);
    let changelog: Value = serde_json::from_str(&stdout).unwrap();
    let changelog = changelog.as_array().unwrap();
    assert_eq!(changelog.len(), 1);
    assert_eq!(changelog[0]["from_version"], 1);
    assert_eq!(changelog[0]["to_version"], 2);
}

#[test]
fn test_point_in_time_reads() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let outcome = upsert(
        &config_path,
        "Service",
        None,
        r#"{"name":"Auth","status":"active"}"#,
        "alice",
    );
    let id = outcome["id"].as_str().unwrap().to_string();

    std::thread::sleep(std::time::Duration::from_millis(30));
    let t_between = chrono::Utc::now().to_rfc3339();
    std::thread::sleep(std::time::Duration::from_millis(30));

    upsert(
        &config_path,
        "Service",
        Some(&id),
        r#"{"name":"Auth","status":"deprecated"}"#,
        "alice",
    );

    let (stdout, _, success) =
        run_engram(&config_path, &["get-at", "--id", &id, "--at", &t_between]);
    assert!(success);
    let record: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["state"]["props"]["status"], "active");

    let t_after = chrono::Utc::now().to_rfc3339();
    let (stdout, _, success) =
        run_engram(&config_path, &["get-at", "--id", &id, "--at", &t_after]);
    assert!(success);
    let record: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(record["state"]["props"]["status"], "deprecated");
}

#[test]
fn test_soft_delete_hides_current_state() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let outcome = upsert(&config_path, "Service", None, r#"{"name":"Auth"}"#, "alice");
    let id = outcome["id"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_engram(&config_path, &["delete", "--id", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (stdout, _, success) = run_engram(&config_path, &["query", "--id", &id]);
    assert!(success);
    assert_eq!(stdout.trim(), "null");

    // Idempotent
    let (stdout, _, success) = run_engram(&config_path, &["delete", "--id", &id]);
    assert!(success);
    assert!(stdout.contains("already deleted"));
}

#[test]
fn test_relationships_lifecycle() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let a = upsert(&config_path, "Service", None, r#"{"name":"Auth"}"#, "alice");
    let b = upsert(&config_path, "Service", None, r#"{"name":"Billing"}"#, "alice");
    let a_id = a["id"].as_str().unwrap().to_string();
    let b_id = b["id"].as_str().unwrap().to_string();

    let (_, stderr, success) = run_engram(
        &config_path,
        &[
            "relate",
            "--from",
            &a_id,
            "--to",
            &b_id,
            "--type",
            "DEPENDS_ON",
            "--from-label",
            "Service",
            "--to-label",
            "Service",
        ],
    );
    assert!(success, "relate failed: {stderr}");

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &a_id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    let rels = view["relationships"].as_array().unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0]["direction"], "outgoing");
    assert_eq!(rels[0]["rel_type"], "DEPENDS_ON");

    // Incoming side
    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &b_id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    let rels = view["relationships"].as_array().unwrap();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0]["direction"], "incoming");

    // Unknown edge triple is rejected
    let (_, _, success) = run_engram(
        &config_path,
        &[
            "relate",
            "--from",
            &a_id,
            "--to",
            &b_id,
            "--type",
            "IMPORTS",
            "--from-label",
            "Service",
            "--to-label",
            "Service",
        ],
    );
    assert!(!success);

    let (_, _, success) = run_engram(
        &config_path,
        &[
            "unrelate",
            "--from",
            &a_id,
            "--to",
            &b_id,
            "--type",
            "DEPENDS_ON",
        ],
    );
    assert!(success);

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &a_id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert!(view["relationships"].as_array().unwrap().is_empty());

    // Unrelate on nothing is tolerated silently
    let (_, _, success) = run_engram(
        &config_path,
        &[
            "unrelate",
            "--from",
            &a_id,
            "--to",
            &b_id,
            "--type",
            "DEPENDS_ON",
        ],
    );
    assert!(success);
}

#[test]
fn test_validate_exit_codes() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let (stdout, _, success) = run_engram(
        &config_path,
        &["validate", "--label", "Service", "--props", r#"{"name":"x"}"#],
    );
    assert!(success);
    assert!(stdout.contains("ok"));
    // Default applied in the normalized output
    assert!(stdout.contains("active"));

    // Missing required key: non-zero exit
    let (_, stderr, success) = run_engram(
        &config_path,
        &["validate", "--label", "Service", "--props", r#"{"status":"active"}"#],
    );
    assert!(!success);
    assert!(stderr.contains("name"));

    // Unknown property: non-zero exit
    let (_, _, success) = run_engram(
        &config_path,
        &["validate", "--label", "Service", "--props", r#"{"name":"x","bogus":1}"#],
    );
    assert!(!success);

    // Unknown label
    let (_, _, success) = run_engram(
        &config_path,
        &["validate", "--label", "Ghost", "--props", r#"{}"#],
    );
    assert!(!success);
}

#[test]
fn test_search_and_query_by_label() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    upsert(
        &config_path,
        "Service",
        None,
        r#"{"name":"auth","replicas":3}"#,
        "alice",
    );
    upsert(
        &config_path,
        "Service",
        None,
        r#"{"name":"billing","replicas":1,"status":"deprecated"}"#,
        "alice",
    );

    let (stdout, _, success) = run_engram(&config_path, &["query", "--label", "Service"]);
    assert!(success);
    let records: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 2);

    let (stdout, _, success) = run_engram(
        &config_path,
        &[
            "search",
            "--label",
            "Service",
            "--filter",
            "status:eq:\"active\"",
        ],
    );
    assert!(success, "search failed");
    let records: Value = serde_json::from_str(&stdout).unwrap();
    let records = records.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["state"]["props"]["name"], "auth");

    let (stdout, _, success) = run_engram(
        &config_path,
        &["search", "--label", "Service", "--filter", "replicas:gt:2"],
    );
    assert!(success);
    let records: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);

    let (stdout, _, success) = run_engram(
        &config_path,
        &["search", "--label", "Service", "--filter", "name:contains:auth"],
    );
    assert!(success);
    let records: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 1);
}

#[test]
fn test_changes_since_and_snapshot() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let epoch = "1970-01-01T00:00:00Z";

    upsert(&config_path, "Service", None, r#"{"name":"auth"}"#, "alice");
    upsert(&config_path, "Service", None, r#"{"name":"billing"}"#, "bob");

    let (stdout, _, success) = run_engram(
        &config_path,
        &["changes-since", "--since", epoch],
    );
    assert!(success);
    let summaries: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summaries.as_array().unwrap().len(), 2);

    // Actor filter
    let (stdout, _, success) = run_engram(
        &config_path,
        &["changes-since", "--since", epoch, "--actors", "bob"],
    );
    assert!(success);
    let summaries: Value = serde_json::from_str(&stdout).unwrap();
    let summaries = summaries.as_array().unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0]["last_actor"], "bob");

    // Nothing after now
    let t_now = chrono::Utc::now().to_rfc3339();
    std::thread::sleep(std::time::Duration::from_millis(20));
    let (stdout, _, success) = run_engram(
        &config_path,
        &["changes-since", "--since", &t_now],
    );
    assert!(success);
    let summaries: Value = serde_json::from_str(&stdout).unwrap();
    assert!(summaries.as_array().unwrap().is_empty());

    // Snapshot now contains both entities; snapshot at epoch is empty
    let t_now = chrono::Utc::now().to_rfc3339();
    let (stdout, _, success) = run_engram(&config_path, &["snapshot", "--at", &t_now]);
    assert!(success);
    let snapshot: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["entities"].as_array().unwrap().len(), 2);

    let (stdout, _, success) = run_engram(&config_path, &["snapshot", "--at", epoch]);
    assert!(success);
    let snapshot: Value = serde_json::from_str(&stdout).unwrap();
    assert!(snapshot["entities"].as_array().unwrap().is_empty());
}

#[test]
fn test_concurrent_upserts_keep_versions_contiguous() {
    let (_tmp, config_path) = setup_test_env();
    run_engram(&config_path, &["init"]);

    let outcome = upsert(&config_path, "Service", None, r#"{"name":"auth"}"#, "alice");
    let id = outcome["id"].as_str().unwrap().to_string();

    let mut handles = Vec::new();
    for i in 0..4 {
        let config_path = config_path.clone();
        let id = id.clone();
        handles.push(std::thread::spawn(move || {
            let props = format!(r#"{{"name":"auth","replicas":{i}}}"#);
            run_engram(
                &config_path,
                &[
                    "--actor",
                    "racer",
                    "upsert",
                    "--label",
                    "Service",
                    "--id",
                    &id,
                    "--props",
                    &props,
                ],
            )
        }));
    }
    let results: Vec<(String, String, bool)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|(_, _, ok)| *ok).count();
    assert!(succeeded >= 1, "at least one concurrent upsert must land");

    let (stdout, _, _) = run_engram(&config_path, &["history", "--id", &id]);
    let history: Value = serde_json::from_str(&stdout).unwrap();
    let history = history.as_array().unwrap();

    // Dense, contiguous version sequence with a single head
    let mut versions: Vec<i64> = history
        .iter()
        .map(|s| s["version"].as_i64().unwrap())
        .collect();
    versions.sort_unstable();
    let expected: Vec<i64> = (1..=versions.len() as i64).collect();
    assert_eq!(versions, expected);

    let heads = history
        .iter()
        .filter(|s| s.get("valid_to").is_none())
        .count();
    assert_eq!(heads, 1);

    // Audit log has one entry per version
    let (stdout, _, _) = run_engram(&config_path, &["audit", "--id", &id]);
    let entries: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), versions.len());
}

#[test]
fn test_schema_resource() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_engram(&config_path, &["schema"]);
    assert!(success);
    let schema: Value = serde_json::from_str(&stdout).unwrap();
    let labels: Vec<&str> = schema["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["File", "Service"]);
    assert!(schema["edges"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["type"] == "DEPENDS_ON"));
}

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn engram_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("engram");
    path
}

fn setup_test_env(strategy: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
path = "{root}/data/engram.sqlite"

[docs]
output_dir = "{root}/docs"
format = "md"

[sync]
conflict_strategy = "{strategy}"

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

[[schema.edges]]
type = "DEPENDS_ON"
from = "Service"
to = "Service"
"#,
        root = root.display(),
        strategy = strategy
    );

    let config_path = config_dir.join("engram.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_engram(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(engram_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap();
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn upsert(config_path: &Path, props: &str) -> String {
    let (stdout, stderr, success) = run_engram(
        config_path,
        &[
            "--actor", "alice", "upsert", "--label", "Service", "--props", props,
        ],
    );
    assert!(success, "upsert failed: {stdout} {stderr}");
    let outcome: Value = serde_json::from_str(&stdout).unwrap();
    outcome["id"].as_str().unwrap().to_string()
}

fn doc_path(tmp: &TempDir, id: &str) -> PathBuf {
    tmp.path().join("docs").join("Service").join(format!("{id}.md"))
}

fn stamped_hash(doc: &str) -> String {
    doc.lines()
        .find_map(|line| line.strip_prefix("_syncHash: "))
        .expect("doc has a _syncHash line")
        .to_string()
}

#[test]
fn test_sync_renders_graph_to_docs() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"auth","content":"The auth service."}"#);

    let (stdout, stderr, success) = run_engram(&config_path, &["sync"]);
    assert!(success, "sync failed: {stdout} {stderr}");
    assert!(stdout.contains("created: 1"));

    let doc = fs::read_to_string(doc_path(&tmp, &id)).unwrap();
    assert!(doc.starts_with("---\n"));
    assert!(doc.contains(&format!("_id: {id}")));
    assert!(doc.contains("_label: Service"));
    assert!(doc.contains("_version: 1"));
    assert!(doc.contains("name: auth"));
    assert!(doc.contains("The auth service."));

    // Second sync is a no-op on the tree
    let (stdout, _, success) = run_engram(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("docs written: 0"));
    assert!(stdout.contains("docs unchanged: 1"));
    assert!(stdout.contains("conflicts: 0"));
}

#[test]
fn test_doc_edit_propagates_to_graph() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"auth"}"#);
    run_engram(&config_path, &["sync"]);

    // Human edits the doc: adds a description, hash stamp untouched.
    let path = doc_path(&tmp, &id);
    let doc = fs::read_to_string(&path).unwrap();
    let old_hash = stamped_hash(&doc);
    let edited = doc.replacen("---\n", "---\ndescription: new text\n", 1);
    fs::write(&path, edited).unwrap();

    let (stdout, stderr, success) = run_engram(&config_path, &["sync"]);
    assert!(success, "sync failed: {stdout} {stderr}");
    assert!(stdout.contains("updated: 1"));
    assert!(stdout.contains("conflicts: 0"));

    // Graph followed the doc at version 2
    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(view["state"]["version"], 2);
    assert_eq!(view["state"]["props"]["description"], "new text");

    // Doc re-rendered with a fresh stamp
    let doc = fs::read_to_string(&path).unwrap();
    assert_ne!(stamped_hash(&doc), old_hash);
    assert!(doc.contains("_version: 2"));
    assert!(doc.contains("description: new text"));
}

#[test]
fn test_conflict_graph_wins_rewrites_doc() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"X","status":"active"}"#);
    run_engram(&config_path, &["sync"]);

    // Doc drifts with a stale stamp: both the hash and a property lie.
    let path = doc_path(&tmp, &id);
    let doc = fs::read_to_string(&path).unwrap();
    let real_hash = stamped_hash(&doc);
    let edited = doc
        .replace(&format!("_syncHash: {real_hash}"), "_syncHash: 0000stale")
        .replace("status: active", "status: deprecated");
    fs::write(&path, edited).unwrap();

    let (stdout, stderr, success) = run_engram(&config_path, &["sync"]);
    assert!(success, "sync failed: {stdout} {stderr}");
    assert!(stdout.contains("conflicts: 1"));
    assert!(stdout.contains("resolved graph-wins"));
    // A conflict is never double-counted as an update
    assert!(stdout.contains("updated: 0"));

    // Graph unchanged
    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(view["state"]["version"], 1);
    assert_eq!(view["state"]["props"]["status"], "active");

    // Doc rewritten from the graph with the real hash
    let doc = fs::read_to_string(&path).unwrap();
    assert!(doc.contains("status: active"));
    assert_eq!(stamped_hash(&doc), real_hash);
}

#[test]
fn test_conflict_docs_wins_updates_graph() {
    let (tmp, config_path) = setup_test_env("docs-wins");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"X","status":"active"}"#);
    run_engram(&config_path, &["sync"]);

    let path = doc_path(&tmp, &id);
    let doc = fs::read_to_string(&path).unwrap();
    let real_hash = stamped_hash(&doc);
    let edited = doc
        .replace(&format!("_syncHash: {real_hash}"), "_syncHash: 0000stale")
        .replace("status: active", "status: deprecated");
    fs::write(&path, edited).unwrap();

    let (stdout, _, success) = run_engram(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("conflicts: 1"));
    assert!(stdout.contains("resolved docs-wins"));

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(view["state"]["version"], 2);
    assert_eq!(view["state"]["props"]["status"], "deprecated");
}

#[test]
fn test_conflict_merge_unions_both_sides() {
    let (tmp, config_path) = setup_test_env("merge");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"X","status":"active"}"#);
    run_engram(&config_path, &["sync"]);

    // Doc gains a description and a stale stamp; graph keeps status.
    let path = doc_path(&tmp, &id);
    let doc = fs::read_to_string(&path).unwrap();
    let real_hash = stamped_hash(&doc);
    let edited = doc
        .replace(&format!("_syncHash: {real_hash}"), "_syncHash: 0000stale")
        .replacen("---\n", "---\ndescription: from the doc\n", 1);
    fs::write(&path, edited).unwrap();

    let (stdout, _, success) = run_engram(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("conflicts: 1"));

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", &id]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    // Union landed in the graph: both sides' properties survive.
    assert_eq!(view["state"]["props"]["status"], "active");
    assert_eq!(view["state"]["props"]["description"], "from the doc");
}

#[test]
fn test_conflict_fail_strategy_aborts_nonzero() {
    let (tmp, config_path) = setup_test_env("fail");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"X","status":"active"}"#);
    run_engram(&config_path, &["sync"]);

    let path = doc_path(&tmp, &id);
    let doc = fs::read_to_string(&path).unwrap();
    let real_hash = stamped_hash(&doc);
    fs::write(
        &path,
        doc.replace(&format!("_syncHash: {real_hash}"), "_syncHash: 0000stale"),
    )
    .unwrap();

    let (_, stderr, success) = run_engram(&config_path, &["sync"]);
    assert!(!success, "fail strategy must exit non-zero");
    assert!(stderr.contains(&id), "error names the entity: {stderr}");
}

#[test]
fn test_doc_only_entity_is_created_in_graph() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let docs = tmp.path().join("docs").join("Service");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("handwritten.md"),
        "---\n_id: handwritten\n_label: Service\n_syncHash: none\n_version: 0\nname: manual\n---\n\nWritten by hand.\n",
    )
    .unwrap();

    let (stdout, stderr, success) = run_engram(&config_path, &["sync"]);
    assert!(success, "sync failed: {stdout} {stderr}");
    assert!(stdout.contains("created: 1"));

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", "handwritten"]);
    let view: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(view["state"]["props"]["name"], "manual");
    assert_eq!(view["state"]["props"]["content"], "Written by hand.");

    // The doc got re-rendered with a real stamp
    let doc = fs::read_to_string(docs.join("handwritten.md")).unwrap();
    assert_ne!(stamped_hash(&doc), "none");
}

#[test]
fn test_deleted_entity_doc_is_pruned() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let id = upsert(&config_path, r#"{"name":"auth"}"#);
    run_engram(&config_path, &["sync"]);
    assert!(doc_path(&tmp, &id).exists());

    run_engram(&config_path, &["delete", "--id", &id]);
    let (stdout, _, success) = run_engram(&config_path, &["sync"]);
    assert!(success);
    assert!(stdout.contains("deleted: 1"));
    assert!(!doc_path(&tmp, &id).exists());
}

#[test]
fn test_invalid_doc_props_collect_as_errors() {
    let (tmp, config_path) = setup_test_env("graph-wins");
    run_engram(&config_path, &["init"]);

    let docs = tmp.path().join("docs").join("Service");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("broken.md"),
        "---\n_id: broken\n_label: Service\n_syncHash: none\n_version: 0\nbogus: true\n---\n",
    )
    .unwrap();

    let (stdout, _, success) = run_engram(&config_path, &["sync"]);
    // Per-change errors are non-fatal outside the fail strategy.
    assert!(success, "sync must survive a bad doc: {stdout}");
    assert!(stdout.contains("error broken:"));

    let (stdout, _, _) = run_engram(&config_path, &["query", "--id", "broken"]);
    assert_eq!(stdout.trim(), "null");
}

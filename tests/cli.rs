//! End-to-end tests of the `apidoc` binary.

mod common;

use common::{build_fixture_kb, save_kb, API_DOC, PYTHON_MODULE};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn apidoc_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("apidoc");
    path
}

/// Temp root with `api.md`, `api.py`, and a config using the disabled
/// provider and `<root>/data` as the index directory.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::write(root.join("api.md"), API_DOC).unwrap();
    fs::write(root.join("api.py"), PYTHON_MODULE).unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[index]
dir = "{}/data"

[chunking]
boundary = "strict"

[embedding]
provider = "disabled"

[server]
bind = "127.0.0.1:0"
"#,
        root.display()
    );
    let config_path = config_dir.join("apidoc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_apidoc(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = apidoc_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run apidoc binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_chunk_counts_markdown() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("api.md");

    let (stdout, stderr, success) = run_apidoc(&config_path, &["chunk", input.to_str().unwrap()]);
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("format: markdown"));
    assert!(stdout.contains("classes: 2"));
    assert!(stdout.contains("methods: 3"));
}

#[test]
fn test_chunk_works_without_config() {
    let (tmp, _) = setup_test_env();
    let missing = tmp.path().join("nope.toml");
    let input = tmp.path().join("api.py");

    let (stdout, stderr, success) = run_apidoc(&missing, &["chunk", input.to_str().unwrap()]);
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("format: python"));
    assert!(stdout.contains("classes: 1"));
    assert!(stdout.contains("methods: 3"));
}

#[test]
fn test_chunk_json_lists_chunks() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("api.md");

    let (stdout, _, success) =
        run_apidoc(&config_path, &["chunk", input.to_str().unwrap(), "--json"]);
    assert!(success);
    let corpus: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(corpus["classes"].as_array().unwrap().len(), 2);
    assert_eq!(corpus["methods"][0]["id"], "method_Actor_move");
    assert_eq!(
        corpus["classes"][0]["text"],
        "## Class Actor\nBase class for every actor placed in a level."
    );
}

#[test]
fn test_chunk_reports_parse_location() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("bad.md");
    fs::write(&input, "## Class Actor\nok\n## Class \n").unwrap();

    let (_, stderr, success) = run_apidoc(&config_path, &["chunk", input.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("parse error at 3:"), "stderr={}", stderr);
}

#[test]
fn test_convert_writes_markdown() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("api.py");
    let output = tmp.path().join("converted.md");

    let (stdout, stderr, success) = run_apidoc(
        &config_path,
        &["convert", input.to_str().unwrap(), output.to_str().unwrap()],
    );
    assert!(success, "convert failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("chunks: 4"));

    let md = fs::read_to_string(&output).unwrap();
    assert!(md.starts_with("# API Documentation"));
    assert!(md.contains("## Class `Actor`"));
    assert!(md.contains("### Function `spawn_light()`"));
}

#[test]
fn test_build_dry_run_does_not_write() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("api.md");

    let (stdout, stderr, success) = run_apidoc(
        &config_path,
        &["build", input.to_str().unwrap(), "--dry-run", "--progress", "off"],
    );
    assert!(success, "build failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("classes: 2"));
    assert!(!tmp.path().join("data").exists());
}

#[test]
fn test_build_requires_embedding_provider() {
    let (tmp, config_path) = setup_test_env();
    let input = tmp.path().join("api.md");

    let (_, stderr, success) = run_apidoc(
        &config_path,
        &["build", input.to_str().unwrap(), "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"), "stderr={}", stderr);
}

#[test]
fn test_query_without_knowledge_base_fails() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_apidoc(&config_path, &["query", "move the actor"]);
    assert!(!success);
    assert!(stderr.contains("Failed to load knowledge base"), "stderr={}", stderr);
}

#[tokio::test]
async fn test_query_json_envelope_on_embedding_failure() {
    let (tmp, config_path) = setup_test_env();
    save_kb(&tmp.path().join("data"), &build_fixture_kb().await);

    let (stdout, stderr, success) =
        run_apidoc(&config_path, &["query", "move the actor", "--json"]);
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);

    let envelope: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(envelope["success"], false);
    assert!(envelope.get("data").is_none());
    assert!(envelope["error"].as_str().unwrap().contains("disabled"));

    let (_, stderr, success) = run_apidoc(&config_path, &["query", "move the actor"]);
    assert!(!success);
    assert!(stderr.contains("Query failed"));
}

#[tokio::test]
async fn test_stats_reports_rows() {
    let (tmp, config_path) = setup_test_env();
    save_kb(&tmp.path().join("data"), &build_fixture_kb().await);

    let (stdout, stderr, success) = run_apidoc(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("keyword-test"));
    let classes_line = stdout.lines().find(|l| l.trim_start().starts_with("Classes")).unwrap();
    assert!(classes_line.split_whitespace().nth(1) == Some("2"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[index]\ndir = \"./data\"\n\n[embedding]\nprovider = \"mystery\"\n",
    )
    .unwrap();

    let (_, stderr, success) = run_apidoc(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, _, success) = run_apidoc(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("apidoc"));
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn jobfit_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("jobfit");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let kb_dir = root.join("kb");
    fs::create_dir_all(&kb_dir).unwrap();
    fs::write(
        kb_dir.join("projects.md"),
        "name: Clinic RAG Chatbot\ndescription: RAG chatbot for a clinic.\ntech_stack: [LangChain, FAISS]\n",
    )
    .unwrap();

    fs::write(
        root.join("jobs.json"),
        r#"[
  {"id": 101, "title": "Build a RAG chatbot", "description": "LangChain and FAISS", "publishedDateTime": "2024-06-01T10:00:00Z"},
  {"id": "102", "title": "Unity game", "description": "Mobile arcade game", "published_at": "2024-06-01T11:00:00Z"}
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/jobfit.sqlite"

[index]
data_dir = "{root}/data/rag"

[[sources]]
name = "projects"
path = "{root}/kb/projects.md"
kind = "project"

[relevance]
window_start = "00:00"
window_end = "00:00"
utc_offset_minutes = 0
"#,
        root = root.display()
    );

    let config_path = config_dir.join("jobfit.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_jobfit(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(jobfit_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("failed to run jobfit binary");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_jobfit(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    let (_, stderr, success) = run_jobfit(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_jobs_import() {
    let (tmp, config) = setup_test_env();
    let jobs = tmp.path().join("jobs.json");
    let (stdout, stderr, success) = run_jobfit(&config, &["jobs", "import", jobs.to_str().unwrap()]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("imported: 2"));
}

#[test]
fn test_relevance_switch_commands() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_jobfit(&config, &["relevance", "enable"]);
    assert!(success, "enable failed: {}", stderr);
    assert!(stdout.contains("enabled: true"));
    assert!(stdout.contains("source: stored_override"));

    let (stdout, _, _) = run_jobfit(&config, &["relevance", "disable"]);
    assert!(stdout.contains("enabled: false"));
    assert!(stdout.contains("stored_override: false"));

    let (stdout, _, success) = run_jobfit(&config, &["relevance", "auto"]);
    assert!(success);
    assert!(stdout.contains("source: schedule"));
    assert!(stdout.contains("stored_override: none"));
}

#[test]
fn test_score_refused_while_switched_off() {
    let (_tmp, config) = setup_test_env();
    run_jobfit(&config, &["relevance", "disable"]);
    let (_, stderr, success) = run_jobfit(&config, &["score", "101"]);
    assert!(!success);
    assert!(stderr.contains("relevance checking is disabled"), "stderr: {}", stderr);
}

#[test]
fn test_score_forced_reports_per_job_status() {
    let (tmp, config) = setup_test_env();
    let jobs = tmp.path().join("jobs.json");
    run_jobfit(&config, &["jobs", "import", jobs.to_str().unwrap()]);
    run_jobfit(&config, &["relevance", "disable"]);

    // Generation is disabled, so loaded jobs fail analysis; 999 does not load.
    let (stdout, stderr, success) = run_jobfit(&config, &["score", "101", "999", "--force"]);
    assert!(success, "score failed: {}", stderr);
    assert!(stdout.contains("101: Analysis Failed"));
    assert!(stdout.contains("999: Load Failed"));
}

#[test]
fn test_cron_run_status_reset() {
    let (tmp, config) = setup_test_env();
    let jobs = tmp.path().join("jobs.json");
    run_jobfit(&config, &["jobs", "import", jobs.to_str().unwrap()]);

    let (stdout, _, success) = run_jobfit(&config, &["cron", "status"]);
    assert!(success);
    assert!(stdout.contains("watermark: none"));

    run_jobfit(&config, &["relevance", "disable"]);
    let (stdout, _, success) = run_jobfit(&config, &["cron", "run"]);
    assert!(success);
    assert!(stdout.contains("status: skipped"));

    run_jobfit(&config, &["relevance", "enable"]);
    let (stdout, stderr, success) = run_jobfit(&config, &["cron", "run"]);
    assert!(success, "cron run failed: {}", stderr);
    assert!(stdout.contains("new_jobs: 2"));
    assert!(stdout.contains("watermark: 2024-06-01T11:00:00+00:00"));

    let (stdout, _, _) = run_jobfit(&config, &["cron", "run"]);
    assert!(stdout.contains("new_jobs: 0"));

    let (stdout, _, _) = run_jobfit(&config, &["cron", "reset"]);
    assert!(stdout.contains("watermark: reset"));
    let (stdout, _, _) = run_jobfit(&config, &["cron", "status"]);
    assert!(stdout.contains("watermark: none"));
}

#[test]
fn test_index_status_reports_missing_artifacts() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, success) = run_jobfit(&config, &["index", "status"]);
    assert!(success, "index status failed: {}", stderr);
    assert!(stdout.contains("sources: 1"));
    assert!(stdout.contains("status: stale (missing artifact"));
}

#[test]
fn test_index_rebuild_fails_without_embedding_provider() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_jobfit(&config, &["index", "rebuild"]);
    assert!(!success);
    assert!(stderr.contains("embedding provider is disabled"), "stderr: {}", stderr);
}

#[test]
fn test_proposal_show_missing_is_not_found() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_jobfit(&config, &["proposal", "show", "101"]);
    assert!(!success);
    assert!(stderr.contains("proposal not found: 101"), "stderr: {}", stderr);
}

#[test]
fn test_proposal_generate_missing_job_fails() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, success) = run_jobfit(&config, &["proposal", "generate", "nope"]);
    assert!(!success);
    assert!(stderr.contains("job not found: nope"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[db]\npath = \"x.sqlite\"\n").unwrap();
    let (_, stderr, success) = run_jobfit(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to parse config file"), "stderr: {}", stderr);
}

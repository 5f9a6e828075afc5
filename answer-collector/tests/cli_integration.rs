//! CLI integration tests for the answer-collector binary.
//!
//! The binary is driven through `std::process::Command`; provider traffic
//! goes to a local mock server configured as an OpenAI-compatible endpoint.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Constants
// =============================================================================

const KEY_VAR: &str = "ANSWER_COLLECTOR_CLI_TEST_KEY";

const QUESTIONS_JSONL: &str = r#"{"id": "q1", "question": "Tacos or pizza?", "option_1": "Tacos", "option_2": "pizza"}
{"id": "q2", "question": "Pizza or tacos?", "option_1": "pizza", "option_2": "Tacos"}
"#;

const QUESTIONS_CSV: &str = "Wording Style,Option 1,Option 2,Question
1,Tacos,pizza,\"What is more delicious? Tacos or pizza?\"
1,pizza,Tacos,\"What is more delicious? pizza or Tacos?\"
";

// =============================================================================
// Helper Functions
// =============================================================================

fn collector_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_answer-collector"))
}

fn run(args: &[&str], key: Option<&str>) -> Output {
    let mut command = Command::new(collector_bin());
    command.args(args).env_remove("RUST_LOG");
    match key {
        Some(key) => command.env(KEY_VAR, key),
        None => command.env_remove(KEY_VAR),
    };
    command
        .output()
        .expect("Failed to execute answer-collector binary")
}

/// Run the binary off the async runtime so the mock server keeps serving
async fn run_async(args: Vec<String>, key: Option<&'static str>) -> Output {
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run(&args, key)
    })
    .await
    .unwrap()
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "Expected exit code 0, got {:?}\nstderr: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_code(output: &Output, code: i32) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "Expected exit code {}, got {:?}\nstdout: {}\nstderr: {}",
        code,
        output.status.code(),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn stdout_str(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(base_url: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("answers");
        let config = format!(
            r#"
[providers.mock]
kind = "openai"
api_key_env = "{KEY_VAR}"
base_url = "{base_url}"
backoff_seed_ms = 10
backoff_max_ms = 50

[[models]]
id = "mock-model"
provider = "mock"

[collector]
max_attempts = 2
transient_backoff_ms = 10
transient_backoff_max_ms = 20
timeout_ms = 5000

[store]
path = "{store}"
"#,
            store = store.display()
        );
        std::fs::write(dir.path().join("collector.toml"), config).unwrap();
        std::fs::write(dir.path().join("questions.jsonl"), QUESTIONS_JSONL).unwrap();
        std::fs::write(dir.path().join("questions.csv"), QUESTIONS_CSV).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).display().to_string()
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("answers")
    }

    fn args(&self, command: &[&str]) -> Vec<String> {
        let mut args = vec!["--config".to_string(), self.path("collector.toml")];
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }
}

fn count_files(dir: &Path, ext: &str) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().extension().is_some_and(|x| x == ext))
                .count()
        })
        .unwrap_or(0)
}

async fn mock_chat(reply: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": reply } }],
            "usage": { "prompt_tokens": 5, "completion_tokens": 1 }
        })))
        .mount(&server)
        .await;
    server
}

// =============================================================================
// Command routing
// =============================================================================

#[test]
fn help_lists_commands() {
    let output = run(&["--help"], None);
    assert_success(&output);
    let stdout = stdout_str(&output);
    for command in ["run", "ask", "stats", "export", "list-models", "check-providers", "init-config"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn init_config_then_list_models() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("collector.toml");
    let path_str = path.display().to_string();

    let output = run(&["init-config", "--output", &path_str], None);
    assert_success(&output);
    assert!(path.exists());

    let output = run(&["--config", &path_str, "list-models"], None);
    assert_success(&output);
    let stdout = stdout_str(&output);
    assert!(stdout.contains("gpt-4o"));
    assert!(stdout.contains("claude-3-5-sonnet-20241022"));
}

#[test]
fn missing_question_file_is_a_setup_error() {
    let ws = Workspace::new("http://127.0.0.1:9");
    let args = ws.args(&["run", "--questions", "/nonexistent/questions.jsonl"]);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    assert_code(&run(&args, Some("sk-test")), 1);
}

#[test]
fn invalid_config_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[[models]]\nid = \"m\"\nprovider = \"nowhere\"\n").unwrap();
    let config = config.display().to_string();

    assert_code(&run(&["--config", &config, "list-models"], None), 1);
}

#[test]
fn broken_config_in_default_location_is_a_setup_error() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    std::fs::write(
        dir.path().join("config").join("collector.toml"),
        "[collector]\nmax_attempts = 0\n",
    )
    .unwrap();

    let output = Command::new(collector_bin())
        .arg("list-models")
        .current_dir(dir.path())
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute answer-collector binary");
    assert_code(&output, 1);
    assert!(!stdout_str(&output).contains("gpt-4o"));
}

// =============================================================================
// Collection runs
// =============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn run_collects_then_resumes_without_requests() {
    let server = mock_chat("Tacos.").await;
    let ws = Workspace::new(&server.uri());
    let questions = ws.path("questions.jsonl");

    let output = run_async(ws.args(&["run", "--questions", &questions]), Some("sk-test")).await;
    assert_success(&output);
    assert!(stdout_str(&output).contains("CLEAN"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let model_dir = ws.store().join("pairs").join("mock-model");
    assert_eq!(count_files(&model_dir, "json"), 2);
    assert_eq!(count_files(&ws.store().join("runs"), "json"), 1);

    // Second run finds everything answered
    let output = run_async(ws.args(&["run", "--questions", &questions]), Some("sk-test")).await;
    assert_success(&output);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let output = run_async(ws.args(&["stats", "--questions", &questions]), None).await;
    assert_success(&output);
    assert!(stdout_str(&output).contains("mock-model"));

    let export_dir = ws.path("export");
    let output = run_async(
        ws.args(&["export", "--questions", &questions, "--output", &export_dir]),
        None,
    )
    .await;
    assert_success(&output);
    let exported = std::fs::read_to_string(Path::new(&export_dir).join("mock-model.jsonl")).unwrap();
    assert_eq!(exported.lines().count(), 2);
    assert!(exported.contains("Tacos."));
}

#[tokio::test(flavor = "multi_thread")]
async fn csv_questions_in_csv_answers_out() {
    let server = mock_chat("pizza").await;
    let ws = Workspace::new(&server.uri());
    let questions = ws.path("questions.csv");

    let output = run_async(ws.args(&["run", "--questions", &questions]), Some("sk-test")).await;
    assert_success(&output);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let export_dir = ws.path("export");
    let output = run_async(
        ws.args(&[
            "export", "--questions", &questions, "--output", &export_dir, "--format", "csv",
        ]),
        None,
    )
    .await;
    assert_success(&output);

    let exported = std::fs::read_to_string(Path::new(&export_dir).join("mock-model.csv")).unwrap();
    let mut lines = exported.lines();
    assert_eq!(
        lines.next(),
        Some("Wording Style,Option 1,Option 2,Question,Answer,Id")
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("1,Tacos,pizza,What is more delicious? Tacos or pizza?,pizza,"));
}

#[tokio::test(flavor = "multi_thread")]
async fn run_with_failures_exits_2() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "unsupported model", "type": "invalid_request_error" }
        })))
        .mount(&server)
        .await;
    let ws = Workspace::new(&server.uri());
    let questions = ws.path("questions.jsonl");

    let output = run_async(ws.args(&["run", "--questions", &questions]), Some("sk-test")).await;
    assert_code(&output, 2);
    assert!(stdout_str(&output).contains("permanent"));

    let failures = std::fs::read_to_string(ws.store().join("failures.jsonl")).unwrap();
    assert_eq!(failures.lines().count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_without_credentials_reports_unavailable() {
    let server = mock_chat("unused").await;
    let ws = Workspace::new(&server.uri());
    let questions = ws.path("questions.jsonl");

    let output = run_async(ws.args(&["run", "--questions", &questions]), None).await;
    assert_code(&output, 2);
    assert!(stdout_str(&output).contains(KEY_VAR));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_prints_raw_reply() {
    let server = mock_chat("Pizza, definitely.").await;
    let ws = Workspace::new(&server.uri());

    let output = run_async(
        ws.args(&["ask", "--model", "mock-model", "Tacos or pizza?"]),
        Some("sk-test"),
    )
    .await;
    assert_success(&output);
    assert_eq!(stdout_str(&output).trim(), "Pizza, definitely.");
    // Ask never writes to the store
    assert!(!ws.store().join("pairs").join("mock-model").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn check_providers_flags_missing_keys() {
    let server = mock_chat("unused").await;
    let ws = Workspace::new(&server.uri());

    let output = run_async(ws.args(&["check-providers"]), None).await;
    assert_code(&output, 1);
    assert!(stdout_str(&output).contains("mock-model"));

    let output = run_async(ws.args(&["check-providers"]), Some("sk-test")).await;
    assert_success(&output);
}

#[tokio::test(flavor = "multi_thread")]
async fn check_providers_asks_each_model() {
    let server = mock_chat("Tacos").await;
    let ws = Workspace::new(&server.uri());

    let output = run_async(ws.args(&["check-providers", "--probe"]), Some("sk-test")).await;
    assert_success(&output);
    let stdout = stdout_str(&output);
    assert!(stdout.contains("mock-model"));
    assert!(stdout.contains("Tacos"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

//! Tool executor integration tests: path confinement, truncation bounds,
//! subprocess handling, environment scrubbing.

use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use hadron::tools::ToolExecutor;

fn executor(dir: &TempDir) -> ToolExecutor {
    ToolExecutor::new(dir.path())
}

/// **Scenario**: `read_file(path: "../../etc/passwd")` is rejected and the
/// filesystem outside the working directory stays untouched.
#[tokio::test]
async fn path_traversal_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let result = executor(&dir)
        .execute("read_file", &json!({"path": "../../etc/passwd"}))
        .await;
    assert_eq!(
        result,
        "Error: Path escapes working directory: ../../etc/passwd"
    );
}

/// **Scenario**: traversal through a not-yet-existing segment cannot climb
/// out either.
#[tokio::test]
async fn traversal_through_missing_segment_is_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let result = executor(&dir)
        .execute("write_file", &json!({"path": "ghost/../../outside.txt", "content": "x"}))
        .await;
    assert!(result.starts_with("Error: Path escapes working directory"));
    assert!(!dir.path().parent().unwrap().join("outside.txt").exists());
}

/// **Scenario**: a symlink pointing outside the working directory is
/// followed during resolution and rejected.
#[tokio::test]
async fn symlink_escape_is_blocked() {
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link")).unwrap();

    let result = executor(&dir).execute("read_file", &json!({"path": "link"})).await;
    assert!(result.starts_with("Error: Path escapes working directory"));
}

#[tokio::test]
async fn read_file_round_trip_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
    let executor = executor(&dir);

    assert_eq!(
        executor.execute("read_file", &json!({"path": "hello.txt"})).await,
        "hello world"
    );
    assert_eq!(
        executor.execute("read_file", &json!({"path": "nope.txt"})).await,
        "Error: File not found: nope.txt"
    );
}

/// **Scenario**: reads cap at ~100k bytes with an explicit marker.
#[tokio::test]
async fn read_file_truncates_large_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("big.txt"), "x".repeat(150_000)).unwrap();
    let result = executor(&dir).execute("read_file", &json!({"path": "big.txt"})).await;
    assert!(result.ends_with("... (truncated)"));
    assert!(result.len() < 101_000);
}

#[tokio::test]
async fn write_file_creates_parents() {
    let dir = tempfile::tempdir().unwrap();
    let result = executor(&dir)
        .execute(
            "write_file",
            &json!({"path": "a/b/c.txt", "content": "nested"}),
        )
        .await;
    assert_eq!(result, "File written: a/b/c.txt");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a/b/c.txt")).unwrap(),
        "nested"
    );
}

/// **Scenario**: listings are sorted, prefixed, and capped at 200 entries.
#[tokio::test]
async fn list_directory_caps_and_prefixes() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("subdir")).unwrap();
    for i in 0..210 {
        std::fs::write(dir.path().join(format!("file{i:03}.txt")), "").unwrap();
    }
    let result = executor(&dir).execute("list_directory", &json!({})).await;
    let lines: Vec<&str> = result.lines().collect();
    assert_eq!(lines.len(), 200);
    assert!(lines.contains(&"d subdir"));
    assert!(lines.iter().filter(|l| l.starts_with("f ")).count() >= 199);

    let empty = tempfile::tempdir().unwrap();
    assert_eq!(
        ToolExecutor::new(empty.path())
            .execute("list_directory", &json!({}))
            .await,
        "(empty directory)"
    );
    assert_eq!(
        executor(&dir)
            .execute("list_directory", &json!({"path": "file000.txt"}))
            .await,
        "Error: Not a directory: file000.txt"
    );
}

#[tokio::test]
async fn run_command_reports_exit_code_and_output() {
    let dir = tempfile::tempdir().unwrap();
    let executor = executor(&dir);

    let ok = executor
        .execute("run_command", &json!({"command": "echo hello"}))
        .await;
    assert!(ok.starts_with("Exit code: 0\n"));
    assert!(ok.contains("hello"));

    let fail = executor
        .execute("run_command", &json!({"command": "exit 3"}))
        .await;
    assert!(fail.starts_with("Exit code: 3\n"));
}

/// **Scenario**: a command past the timeout is killed and reported.
#[tokio::test]
async fn run_command_kills_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let executor =
        ToolExecutor::new(dir.path()).with_command_timeout(Duration::from_millis(200));
    let result = executor
        .execute("run_command", &json!({"command": "sleep 30"}))
        .await;
    assert!(result.contains("timed out"));
    assert!(result.contains("process killed"));
}

/// **Scenario**: secret env vars never reach subprocesses; PATH survives
/// and bytecode writing is disabled.
#[tokio::test]
async fn run_command_scrubs_environment() {
    std::env::set_var("HADRON_ANTHROPIC_API_KEY", "sk-secret");
    std::env::set_var("GITHUB_TOKEN", "ghp-secret");
    let dir = tempfile::tempdir().unwrap();
    let result = executor(&dir)
        .execute("run_command", &json!({"command": "env"}))
        .await;
    std::env::remove_var("HADRON_ANTHROPIC_API_KEY");
    std::env::remove_var("GITHUB_TOKEN");

    assert!(!result.contains("sk-secret"));
    assert!(!result.contains("ghp-secret"));
    assert!(result.contains("PATH="));
    assert!(result.contains("PYTHONDONTWRITEBYTECODE=1"));
    assert!(result.contains("GIT_TERMINAL_PROMPT=0"));
}

#[tokio::test]
async fn unknown_tool_is_an_error_string() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(
        executor(&dir).execute("launch_missiles", &json!({})).await,
        "Error: Unknown tool: launch_missiles"
    );
}

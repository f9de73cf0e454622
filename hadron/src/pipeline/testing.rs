//! Shared test runner used by the TDD, rebase and delivery nodes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

const OUTPUT_TAIL: usize = 50_000;

/// Runs a repo's test command inside a worktree and returns
/// `(passed, output)`.
///
/// - `{cr_id}` is interpolated into the command.
/// - The command always runs with cwd = worktree.
/// - The process is killed (then waited on) past `timeout`.
pub async fn run_test_command(
    worktree: &Path,
    test_command: &str,
    cr_id: &str,
    timeout: Duration,
) -> (bool, String) {
    let command = test_command.replace("{cr_id}", cr_id);

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(worktree)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return (false, format!("Error: failed to spawn test command: {e}")),
    };

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => return (false, format!("Error: test command failed: {e}")),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            warn!(command = %command, timeout_secs = timeout.as_secs(), "test command timed out");
            return (
                false,
                format!(
                    "Error: test command timed out after {}s (process killed)",
                    timeout.as_secs()
                ),
            );
        }
    };

    let mut output = Vec::new();
    if let Ok(out) = stdout_task.await {
        output.extend(out);
    }
    if let Ok(err) = stderr_task.await {
        output.extend(err);
    }
    let mut text = String::from_utf8_lossy(&output).into_owned();
    if text.len() > OUTPUT_TAIL {
        let start = text.len() - OUTPUT_TAIL;
        let mut begin = start;
        while !text.is_char_boundary(begin) {
            begin += 1;
        }
        text = text[begin..].to_string();
    }
    (status.success(), text)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: a passing command reports success with its output.
    #[tokio::test]
    async fn passing_command() {
        let dir = tempfile::tempdir().unwrap();
        let (passed, output) =
            run_test_command(dir.path(), "echo tests ok", "CR-1", Duration::from_secs(10)).await;
        assert!(passed);
        assert!(output.contains("tests ok"));
    }

    /// **Scenario**: a failing exit code reports failure.
    #[tokio::test]
    async fn failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let (passed, _) =
            run_test_command(dir.path(), "false", "CR-1", Duration::from_secs(10)).await;
        assert!(!passed);
    }

    /// **Scenario**: {cr_id} interpolates into the command.
    #[tokio::test]
    async fn cr_id_interpolation() {
        let dir = tempfile::tempdir().unwrap();
        let (passed, output) =
            run_test_command(dir.path(), "echo run {cr_id}", "CR-42", Duration::from_secs(10))
                .await;
        assert!(passed);
        assert!(output.contains("run CR-42"));
    }

    /// **Scenario**: a hung command is killed at the timeout and reported.
    #[tokio::test]
    async fn timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let (passed, output) =
            run_test_command(dir.path(), "sleep 30", "CR-1", Duration::from_millis(200)).await;
        assert!(!passed);
        assert!(output.contains("timed out"));
        assert!(output.contains("process killed"));
    }
}

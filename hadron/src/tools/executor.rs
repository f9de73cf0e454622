//! Tool executor: filesystem and subprocess operations confined to one
//! working directory.
//!
//! Failures never propagate to the caller. Every problem becomes a
//! human-readable `Error: …` string so the LLM can read it and react.
//!
//! The single load-bearing defense is path confinement: every path input is
//! resolved (following symlinks) and rejected unless it lands inside the
//! working directory.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::defs::{TOOL_LIST_DIRECTORY, TOOL_READ_FILE, TOOL_RUN_COMMAND, TOOL_WRITE_FILE};

const READ_LIMIT: usize = 100_000;
const LIST_LIMIT: usize = 200;
const COMMAND_OUTPUT_LIMIT: usize = 50_000;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Env var prefixes stripped from subprocess environments.
const SCRUBBED_ENV_PREFIXES: &[&str] = &["HADRON_", "ANTHROPIC_", "GEMINI_", "OPENAI_", "AWS_"];

/// Individual secret keys stripped from subprocess environments.
const SCRUBBED_ENV_KEYS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "OPENAI_API_KEY",
    "GOOGLE_API_KEY",
    "GITHUB_TOKEN",
    "GH_TOKEN",
    "DATABASE_URL",
    "POSTGRES_URL",
    "REDIS_URL",
];

/// Executes named tools inside a fixed working directory.
pub struct ToolExecutor {
    working_dir: PathBuf,
    command_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the run_command timeout. Used by tests.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Executes one tool call. Never fails; errors come back as strings.
    pub async fn execute(&self, name: &str, input: &Value) -> String {
        debug!(tool = name, "tool call");
        match name {
            TOOL_READ_FILE => self.read_file(input).await,
            TOOL_WRITE_FILE => self.write_file(input).await,
            TOOL_LIST_DIRECTORY => self.list_directory(input).await,
            TOOL_RUN_COMMAND => self.run_command(input).await,
            other => format!("Error: Unknown tool: {other}"),
        }
    }

    /// Resolves a user path against the working directory, following
    /// symlinks, and rejects anything that escapes it.
    fn confine(&self, user_path: &str) -> Result<PathBuf, String> {
        let escape = || format!("Error: Path escapes working directory: {user_path}");

        let root = self
            .working_dir
            .canonicalize()
            .map_err(|e| format!("Error: working directory unavailable: {e}"))?;

        // Lexical normalization first so `..` in not-yet-existing segments
        // cannot climb out.
        let joined = root.join(user_path);
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(escape());
                    }
                }
                other => normalized.push(other),
            }
        }

        // Canonicalize the deepest existing ancestor to follow symlinks.
        let mut existing = normalized.clone();
        let mut tail: Vec<OsString> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            let Some(name) = existing.file_name().map(OsString::from) else {
                return Err(escape());
            };
            tail.push(name);
            if !existing.pop() {
                return Err(escape());
            }
        }
        let mut resolved = existing.canonicalize().map_err(|_| escape())?;
        for name in tail.into_iter().rev() {
            resolved.push(name);
        }

        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(escape())
        }
    }

    async fn read_file(&self, input: &Value) -> String {
        let Some(path_param) = input.get("path").and_then(Value::as_str) else {
            return "Error: missing required parameter: path".to_string();
        };
        let path = match self.confine(path_param) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !path.is_file() {
            return format!("Error: File not found: {path_param}");
        }
        match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.len() > READ_LIMIT => {
                let mut end = READ_LIMIT;
                while !content.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}\n... (truncated)", &content[..end])
            }
            Ok(content) => content,
            Err(e) => format!("Error executing read_file: {e}"),
        }
    }

    async fn write_file(&self, input: &Value) -> String {
        let Some(path_param) = input.get("path").and_then(Value::as_str) else {
            return "Error: missing required parameter: path".to_string();
        };
        let Some(content) = input.get("content").and_then(Value::as_str) else {
            return "Error: missing required parameter: content".to_string();
        };
        let path = match self.confine(path_param) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return format!("Error executing write_file: {e}");
            }
        }
        // Write to a sibling temp file, then rename into place.
        let tmp = path.with_file_name(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::write(&tmp, content).await {
            return format!("Error executing write_file: {e}");
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return format!("Error executing write_file: {e}");
        }
        format!("File written: {path_param}")
    }

    async fn list_directory(&self, input: &Value) -> String {
        let path_param = input
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        let path = match self.confine(&path_param) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if !path.is_dir() {
            return format!("Error: Not a directory: {path_param}");
        }
        let mut entries = match std::fs::read_dir(&path) {
            Ok(iter) => iter
                .filter_map(|e| e.ok())
                .map(|e| {
                    let prefix = if e.path().is_dir() { "d " } else { "f " };
                    format!("{prefix}{}", e.file_name().to_string_lossy())
                })
                .collect::<Vec<_>>(),
            Err(e) => return format!("Error executing list_directory: {e}"),
        };
        entries.sort();
        entries.truncate(LIST_LIMIT);
        if entries.is_empty() {
            "(empty directory)".to_string()
        } else {
            entries.join("\n")
        }
    }

    /// Environment for subprocesses: inherited vars minus secret prefixes
    /// and keys, plus bytecode/prompt suppression.
    fn scrubbed_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| {
                !SCRUBBED_ENV_KEYS.contains(&key.as_str())
                    && !SCRUBBED_ENV_PREFIXES.iter().any(|p| key.starts_with(p))
            })
            .collect();
        env.push(("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()));
        env.push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));
        env
    }

    async fn run_command(&self, input: &Value) -> String {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return "Error: missing required parameter: command".to_string();
        };

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(self.scrubbed_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => return format!("Error executing run_command: {e}"),
        };

        // Drain pipes concurrently so a chatty child cannot deadlock on a
        // full pipe while we wait.
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

        let status = match tokio::time::timeout(self.command_timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return format!("Error executing run_command: {e}"),
            Err(_) => {
                // Kill, then wait: cancelling only the wait would leak the child.
                let _ = child.kill().await;
                let _ = child.wait().await;
                warn!(command, timeout_secs = self.command_timeout.as_secs(), "command timed out");
                return format!(
                    "Error: command timed out after {}s (process killed)",
                    self.command_timeout.as_secs()
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
        if text.len() > COMMAND_OUTPUT_LIMIT {
            let mut end = COMMAND_OUTPUT_LIMIT;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str("\n... (truncated)");
        }
        format!("Exit code: {}\n{}", status.code().unwrap_or(-1), text)
    }
}

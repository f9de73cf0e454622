//! WorktreeManager: git bare clones and per-CR worktrees via subprocess.
//!
//! Directory layout:
//! ```text
//! {workspace}/repos/{repo_name}/            ← bare clone, shared across CRs
//! {workspace}/runs/cr-{cr_id}/{repo_name}/  ← worktree on branch ai/cr-{cr_id}
//! ```
//!
//! Concurrent `fetch --all` on one bare clone is left to git's own locking.
//! Every invocation sets `GIT_TERMINAL_PROMPT=0` so a missing credential
//! fails instead of hanging on a prompt.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Git subprocess failure.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed (rc={code}): {stderr}")]
    Command {
        args: String,
        code: i32,
        stderr: String,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Directories never included in the compact tree used for prompt context.
const TREE_EXCLUDES: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
    "vendor",
    "dist",
];

async fn run_git(args: &[&str], cwd: Option<&Path>) -> Result<String, GitError> {
    debug!(args = %args.join(" "), cwd = ?cwd, "git");
    let mut command = Command::new("git");
    command.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command.output().await?;
    if !output.status.success() {
        return Err(GitError::Command {
            args: args.join(" "),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Outcome of a rebase attempt. On conflicts the worktree is left
/// mid-rebase so a resolver can rewrite files and continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebaseOutcome {
    Clean,
    Conflicts(Vec<String>),
}

/// Manages git bare clones and worktrees for pipeline runs.
#[derive(Clone)]
pub struct WorktreeManager {
    workspace: PathBuf,
}

impl WorktreeManager {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    fn bare_path(&self, repo_name: &str) -> PathBuf {
        self.workspace.join("repos").join(repo_name)
    }

    pub fn worktree_path(&self, cr_id: &str, repo_name: &str) -> PathBuf {
        self.workspace.join("runs").join(format!("cr-{cr_id}")).join(repo_name)
    }

    pub fn branch_name(cr_id: &str) -> String {
        format!("ai/cr-{cr_id}")
    }

    /// Clones a repository bare. Idempotent: an existing clone is refreshed
    /// with `fetch --all` instead.
    ///
    /// Bare clones carry no fetch refspec, so one is configured; without it
    /// `origin/{base}` never materializes and every rebase would fail.
    pub async fn clone_bare(&self, repo_url: &str, repo_name: &str) -> Result<PathBuf, GitError> {
        let bare = self.bare_path(repo_name);
        if bare.exists() {
            info!(path = %bare.display(), "bare clone exists, fetching");
            run_git(&["fetch", "--all"], Some(&bare)).await?;
            return Ok(bare);
        }
        if let Some(parent) = bare.parent() {
            std::fs::create_dir_all(parent)?;
        }
        run_git(
            &["clone", "--bare", repo_url, &bare.to_string_lossy()],
            None,
        )
        .await?;
        run_git(
            &[
                "config",
                "remote.origin.fetch",
                "+refs/heads/*:refs/remotes/origin/*",
            ],
            Some(&bare),
        )
        .await?;
        run_git(&["fetch", "--all"], Some(&bare)).await?;
        Ok(bare)
    }

    /// Creates the CR worktree on branch `ai/cr-{cr_id}` from `start_branch`.
    /// Idempotent: an existing worktree is returned as-is.
    pub async fn create_worktree(
        &self,
        repo_name: &str,
        cr_id: &str,
        start_branch: &str,
    ) -> Result<PathBuf, GitError> {
        let bare = self.bare_path(repo_name);
        let worktree = self.worktree_path(cr_id, repo_name);
        if worktree.exists() {
            info!(path = %worktree.display(), "worktree exists");
            return Ok(worktree);
        }
        if let Some(parent) = worktree.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let branch = Self::branch_name(cr_id);
        run_git(
            &[
                "worktree",
                "add",
                "-b",
                &branch,
                &worktree.to_string_lossy(),
                start_branch,
            ],
            Some(&bare),
        )
        .await?;
        Ok(worktree)
    }

    /// Recovers a worktree by checking out the existing remote CR branch.
    /// Used when a resumed CR lands on a fresh host.
    pub async fn recover_from_remote(
        &self,
        repo_url: &str,
        repo_name: &str,
        cr_id: &str,
    ) -> Result<PathBuf, GitError> {
        self.clone_bare(repo_url, repo_name).await?;
        let bare = self.bare_path(repo_name);
        let worktree = self.worktree_path(cr_id, repo_name);
        if worktree.exists() {
            return Ok(worktree);
        }
        if let Some(parent) = worktree.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let branch = Self::branch_name(cr_id);
        if let Err(e) = run_git(&["fetch", "origin", &branch], Some(&bare)).await {
            warn!(error = %e, "fetch of remote CR branch failed, trying local ref");
        }
        run_git(
            &["worktree", "add", &worktree.to_string_lossy(), &branch],
            Some(&bare),
        )
        .await?;
        Ok(worktree)
    }

    /// Stages everything, commits, and pushes the current branch. A clean
    /// tree is a no-op.
    pub async fn commit_and_push(&self, worktree: &Path, message: &str) -> Result<(), GitError> {
        run_git(&["add", "-A"], Some(worktree)).await?;
        let status = run_git(&["status", "--porcelain"], Some(worktree)).await?;
        if status.is_empty() {
            info!(path = %worktree.display(), "nothing to commit");
        } else {
            run_git(&["commit", "-m", message], Some(worktree)).await?;
        }
        let branch = run_git(&["rev-parse", "--abbrev-ref", "HEAD"], Some(worktree)).await?;
        run_git(&["push", "origin", &branch], Some(worktree)).await?;
        Ok(())
    }

    /// Diff between the current branch and the base branch.
    pub async fn diff_against_base(
        &self,
        worktree: &Path,
        base_branch: &str,
    ) -> Result<String, GitError> {
        run_git(&["diff", &format!("{base_branch}...HEAD")], Some(worktree)).await
    }

    /// Fetches the base branch and attempts a rebase onto it. On conflicts
    /// the worktree is left mid-rebase and the conflicted files returned.
    pub async fn rebase(
        &self,
        worktree: &Path,
        base_branch: &str,
    ) -> Result<RebaseOutcome, GitError> {
        run_git(&["fetch", "origin", base_branch], Some(worktree)).await?;
        match run_git(&["rebase", &format!("origin/{base_branch}")], Some(worktree)).await {
            Ok(_) => Ok(RebaseOutcome::Clean),
            Err(GitError::Command { .. }) => {
                let conflicts = self.conflicted_files(worktree).await?;
                Ok(RebaseOutcome::Conflicts(conflicts))
            }
            Err(e) => Err(e),
        }
    }

    /// Continues a mid-rebase worktree after conflicts were rewritten.
    /// Further conflicts surface the same way as [`WorktreeManager::rebase`].
    pub async fn continue_rebase(&self, worktree: &Path) -> Result<RebaseOutcome, GitError> {
        run_git(&["add", "-A"], Some(worktree)).await?;
        match run_git(
            &["-c", "core.editor=true", "rebase", "--continue"],
            Some(worktree),
        )
        .await
        {
            Ok(_) => Ok(RebaseOutcome::Clean),
            Err(GitError::Command { .. }) => {
                let conflicts = self.conflicted_files(worktree).await?;
                Ok(RebaseOutcome::Conflicts(conflicts))
            }
            Err(e) => Err(e),
        }
    }

    /// Abandons a mid-rebase worktree.
    pub async fn abort_rebase(&self, worktree: &Path) -> Result<(), GitError> {
        run_git(&["rebase", "--abort"], Some(worktree)).await?;
        Ok(())
    }

    /// Unmerged paths in a mid-rebase worktree.
    pub async fn conflicted_files(&self, worktree: &Path) -> Result<Vec<String>, GitError> {
        let output = run_git(
            &["diff", "--name-only", "--diff-filter=U"],
            Some(worktree),
        )
        .await?;
        Ok(output
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Compact directory tree for prompt context: depth-limited, hidden and
    /// vendored/cache directories excluded, files sorted per directory.
    pub fn directory_tree(&self, worktree: &Path, max_depth: usize) -> String {
        let mut lines = Vec::new();
        let walker = WalkDir::new(worktree)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() == 0 {
                    return true;
                }
                !name.starts_with('.') && !TREE_EXCLUDES.contains(&name.as_ref())
            });
        for entry in walker.flatten() {
            let depth = entry.depth();
            let indent = "  ".repeat(depth);
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_dir() {
                if depth == 0 {
                    lines.push(format!(
                        "{}/",
                        worktree
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| ".".to_string())
                    ));
                } else {
                    lines.push(format!("{indent}{name}/"));
                }
            } else {
                lines.push(format!("{indent}{name}"));
            }
        }
        lines.join("\n")
    }
}

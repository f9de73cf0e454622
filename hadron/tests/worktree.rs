//! Worktree manager tests against real git repositories. Skipped when no
//! git binary is available.

use std::path::{Path, PathBuf};
use std::process::Command;

use hadron::git::{RebaseOutcome, WorktreeManager};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=test",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Builds a bare origin with one commit on main; returns its path.
fn make_origin(root: &Path) -> PathBuf {
    let work = root.join("seed");
    std::fs::create_dir_all(&work).unwrap();
    git(&["init", "-b", "main"], &work);
    std::fs::write(work.join("README.md"), "# seed\n").unwrap();
    std::fs::write(work.join("app.py"), "print('hi')\n").unwrap();
    git(&["add", "-A"], &work);
    git(&["commit", "-m", "init"], &work);
    let origin = root.join("origin.git");
    git(
        &["clone", "--bare", work.to_str().unwrap(), origin.to_str().unwrap()],
        root,
    );
    origin
}

/// **Scenario**: clone-bare then create-worktree yields a checked-out
/// branch ai/cr-{id}; both operations are idempotent.
#[tokio::test]
async fn clone_and_worktree_are_idempotent() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let origin = make_origin(root.path());
    let manager = WorktreeManager::new(root.path().join("workspace"));

    manager.clone_bare(origin.to_str().unwrap(), "repo").await.unwrap();
    let worktree = manager.create_worktree("repo", "abc123", "main").await.unwrap();
    assert!(worktree.join("README.md").is_file());

    // Second pass reuses both.
    manager.clone_bare(origin.to_str().unwrap(), "repo").await.unwrap();
    let again = manager.create_worktree("repo", "abc123", "main").await.unwrap();
    assert_eq!(worktree, again);

    let head = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(&worktree)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), "ai/cr-abc123");
}

/// **Scenario**: commit-and-push lands the branch on the origin; a clean
/// tree pushes without a new commit.
#[tokio::test]
async fn commit_and_push_updates_origin() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let origin = make_origin(root.path());
    let manager = WorktreeManager::new(root.path().join("workspace"));
    manager.clone_bare(origin.to_str().unwrap(), "repo").await.unwrap();
    let worktree = manager.create_worktree("repo", "x1", "main").await.unwrap();

    std::fs::write(worktree.join("feature.py"), "# new\n").unwrap();
    git(&["config", "user.email", "bot@example.com"], &worktree);
    git(&["config", "user.name", "bot"], &worktree);
    manager.commit_and_push(&worktree, "feat: add feature").await.unwrap();

    let branch_exists = Command::new("git")
        .args(["rev-parse", "--verify", "ai/cr-x1"])
        .current_dir(&origin)
        .output()
        .unwrap();
    assert!(branch_exists.status.success(), "branch should exist on origin");

    // Clean tree: no new commit, push still succeeds.
    manager.commit_and_push(&worktree, "noop").await.unwrap();

    let diff = manager.diff_against_base(&worktree, "main").await.unwrap();
    assert!(diff.contains("feature.py"));
}

/// **Scenario**: rebasing onto an unchanged base is clean.
#[tokio::test]
async fn rebase_on_unchanged_base_is_clean() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let origin = make_origin(root.path());
    let manager = WorktreeManager::new(root.path().join("workspace"));
    manager.clone_bare(origin.to_str().unwrap(), "repo").await.unwrap();
    let worktree = manager.create_worktree("repo", "x2", "main").await.unwrap();

    let outcome = manager.rebase(&worktree, "main").await.unwrap();
    assert_eq!(outcome, RebaseOutcome::Clean);
}

/// **Scenario**: the compact tree hides dotfiles and vendored directories
/// and respects the depth limit.
#[tokio::test]
async fn directory_tree_excludes_noise() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let origin = make_origin(root.path());
    let manager = WorktreeManager::new(root.path().join("workspace"));
    manager.clone_bare(origin.to_str().unwrap(), "repo").await.unwrap();
    let worktree = manager.create_worktree("repo", "x3", "main").await.unwrap();

    std::fs::create_dir_all(worktree.join("node_modules/junk")).unwrap();
    std::fs::create_dir_all(worktree.join("src/deep/deeper/deepest")).unwrap();
    std::fs::write(worktree.join("src/lib.py"), "").unwrap();

    let tree = manager.directory_tree(&worktree, 3);
    assert!(tree.contains("README.md"));
    assert!(tree.contains("src/"));
    assert!(tree.contains("lib.py"));
    assert!(!tree.contains("node_modules"));
    assert!(!tree.contains(".git"));
    assert!(!tree.contains("deepest"));
}

//! End-to-end pipeline tests: the full graph against in-memory stores, a
//! scripted agent backend, and a real local git origin. Skipped when no
//! git binary is available.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde_json::json;

use hadron::agent::mock::MockAgentBackend;
use hadron::event::EventType;
use hadron::events::{keys, EventBus};
use hadron::kvs::{Kvs, MemoryKvs};
use hadron::memory::MemorySaver;
use hadron::state::{PipelineState, RunStatus};
use hadron::store::{CrRunRecord, CrRunStore, MemoryRunStore};
use worker::{run_worker, WorkerDeps};

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

fn make_origin(root: &Path) -> PathBuf {
    let work = root.join("seed");
    std::fs::create_dir_all(&work).unwrap();
    git(&["init", "-b", "main"], &work);
    std::fs::write(work.join("README.md"), "# service\n").unwrap();
    git(&["add", "-A"], &work);
    git(&["commit", "-m", "init"], &work);
    let origin = root.join("origin.git");
    git(
        &["clone", "--bare", work.to_str().unwrap(), origin.to_str().unwrap()],
        root,
    );
    origin
}

struct Harness {
    run_store: Arc<MemoryRunStore>,
    kvs: Arc<MemoryKvs>,
    checkpointer: Arc<MemorySaver<PipelineState>>,
    backend: Arc<MockAgentBackend>,
    workspace: PathBuf,
    cr_id: String,
}

impl Harness {
    async fn new(root: &Path, cr_id: &str) -> Self {
        let origin = make_origin(root);
        let run_store = Arc::new(MemoryRunStore::new());
        let record = CrRunRecord::pending(
            cr_id,
            "api",
            None,
            json!({
                "title": "Add /status endpoint",
                "description": "Expose a JSON status endpoint returning service health.",
                "source": "api",
                "repo_url": origin.to_str().unwrap(),
                "repo_default_branch": "main",
                "test_command": "pytest",
                "language": "python",
            }),
            serde_json::to_value(hadron::config::ConfigSnapshot::default()).unwrap(),
        );
        run_store.insert(&record).await.unwrap();

        let backend = Arc::new(MockAgentBackend::new());
        backend.respond(
            "intake_parser",
            r#"```json
{"title": "Add /status endpoint", "description": "Expose a JSON status endpoint.",
 "acceptance_criteria": ["GET /status returns 200"], "affected_domains": ["api"],
 "priority": "medium", "constraints": [], "risk_flags": []}
```"#,
        );
        backend.respond("spec_writer", "Wrote features/status.feature");
        backend.respond(
            "spec_verifier",
            r#"{"verified": true, "feedback": "", "missing_scenarios": [], "issues": []}"#,
        );
        backend.respond("test_writer", "Wrote failing tests");
        backend.respond("code_writer", "Implemented the endpoint");
        for role in ["security_reviewer", "quality_reviewer", "spec_compliance_reviewer"] {
            backend.respond(role, r#"{"review_passed": true, "findings": []}"#);
        }

        Self {
            run_store,
            kvs: Arc::new(MemoryKvs::new()),
            checkpointer: Arc::new(MemorySaver::new()),
            backend,
            workspace: root.join("workspace"),
            cr_id: cr_id.to_string(),
        }
    }

    fn deps(&self) -> WorkerDeps {
        WorkerDeps {
            run_store: self.run_store.clone(),
            kvs: self.kvs.clone(),
            agents: self.backend.clone(),
            checkpointer: self.checkpointer.clone(),
            workspace_dir: self.workspace.clone(),
        }
    }

    async fn events(&self) -> Vec<hadron::event::PipelineEvent> {
        let bus = EventBus::new(self.kvs.clone() as Arc<dyn Kvs>);
        let (events, _) = bus.replay(&self.cr_id, "0").await.unwrap();
        events
    }
}

/// **Scenario**: happy path. Status runs pending→running→completed, the
/// stream holds pipeline_started, twelve top-level stage_entered events and
/// a final pipeline_completed, and the ai/cr-{id} branch is pushed.
#[tokio::test]
async fn happy_path_completes_with_full_event_trail() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let harness = Harness::new(root.path(), "CR-happy01").await;

    run_worker(&harness.cr_id, harness.deps()).await.unwrap();

    let run = harness.run_store.get(&harness.cr_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.cost_usd > 0.0, "agent cost should accumulate");

    let events = harness.events().await;
    assert_eq!(events[0].event_type, EventType::PipelineStarted);
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::PipelineCompleted
    );

    let top_level_stages: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::StageEntered && !e.stage.contains(':'))
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(
        top_level_stages,
        vec![
            "intake",
            "repo_id",
            "worktree_setup",
            "behaviour_translation",
            "behaviour_verification",
            "tdd",
            "review",
            "rebase",
            "delivery",
            "release_gate",
            "release",
            "retrospective",
        ]
    );

    // Timestamps and ordering: non-decreasing along the stream.
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }

    // The CR branch was pushed by the TDD commit regardless of test result.
    let origin = root.path().join("origin.git");
    let branch = Command::new("git")
        .args(["rev-parse", "--verify", &format!("ai/cr-{}", harness.cr_id)])
        .current_dir(&origin)
        .output()
        .unwrap();
    assert!(branch.status.success(), "pushed branch should exist on origin");

    // Reviewers ran for each repo; sub-stage events were tagged.
    assert!(events.iter().any(|e| e.stage == "tdd:test_writer"));
    assert!(events.iter().any(|e| e.stage == "review:security_reviewer"));
}

/// **Scenario**: the verifier rejects the specs three times; translation and
/// verification alternate, then the circuit breaker pauses the run with an
/// explanatory error.
#[tokio::test]
async fn verification_failures_trip_circuit_breaker() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let harness = Harness::new(root.path(), "CR-stuck01").await;
    // Rescript the verifier: always unverified.
    harness.backend.clear("spec_verifier").respond(
        "spec_verifier",
        r#"{"verified": false, "feedback": "missing scenarios", "missing_scenarios": ["error path"], "issues": []}"#,
    );

    run_worker(&harness.cr_id, harness.deps()).await.unwrap();

    let run = harness.run_store.get(&harness.cr_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Paused);
    assert!(
        run.error.as_deref().unwrap_or("").contains("Verification circuit breaker"),
        "error should name the breaker: {:?}",
        run.error
    );

    let roles = harness.backend.executed_roles();
    let translations = roles.iter().filter(|r| r.as_str() == "spec_writer").count();
    let verifications = roles.iter().filter(|r| r.as_str() == "spec_verifier").count();
    assert_eq!(translations, 3);
    assert_eq!(verifications, 3);

    let events = harness.events().await;
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::PipelinePaused
    );
}

/// **Scenario**: a run paused on review receives resume overrides
/// {review_passed: true}; the engine applies them as if the review node
/// produced them and continues through rebase to completion.
#[tokio::test]
async fn resume_with_overrides_continues_past_review() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }
    let root = tempfile::tempdir().unwrap();
    let harness = Harness::new(root.path(), "CR-resume1").await;
    // Blocking findings pause the run at the review breaker.
    let blocking = r#"{"review_passed": false, "findings": [
        {"severity": "critical", "category": "security", "file": "app.py", "line": 1,
         "message": "hardcoded credential"}]}"#;
    harness.backend.clear("security_reviewer").respond("security_reviewer", blocking);

    run_worker(&harness.cr_id, harness.deps()).await.unwrap();
    let run = harness.run_store.get(&harness.cr_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Paused);

    // Operator override, exactly as the resume endpoint stores it.
    harness
        .kvs
        .set_ex(
            &keys::resume_overrides(&harness.cr_id),
            r#"{"review_passed": true}"#,
            std::time::Duration::from_secs(3600),
        )
        .await
        .unwrap();

    run_worker(&harness.cr_id, harness.deps()).await.unwrap();

    let run = harness.run_store.get(&harness.cr_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    // Overrides were consumed exactly once.
    assert_eq!(
        harness
            .kvs
            .get(&keys::resume_overrides(&harness.cr_id))
            .await
            .unwrap(),
        None
    );

    // The resumed run re-entered at rebase, not at review.
    let events = harness.events().await;
    let resumed_at = events
        .iter()
        .position(|e| {
            e.event_type == EventType::PipelineStarted
                && e.data.get("resumed").and_then(|v| v.as_bool()) == Some(true)
        })
        .expect("resumed pipeline_started event");
    let stages_after_resume: Vec<&str> = events[resumed_at..]
        .iter()
        .filter(|e| e.event_type == EventType::StageEntered && !e.stage.contains(':'))
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(
        stages_after_resume,
        vec!["rebase", "delivery", "release_gate", "release", "retrospective"]
    );
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::PipelineCompleted
    );
}

/// **Scenario**: a run with no repository fails fast and is marked failed.
#[tokio::test]
async fn missing_repo_fails_run() {
    let run_store = Arc::new(MemoryRunStore::new());
    let record = CrRunRecord::pending(
        "CR-norepo1",
        "api",
        None,
        json!({"title": "t", "description": "d"}),
        serde_json::to_value(hadron::config::ConfigSnapshot::default()).unwrap(),
    );
    run_store.insert(&record).await.unwrap();

    let backend = Arc::new(MockAgentBackend::new());
    backend.respond("intake_parser", r#"{"title": "t", "description": "d"}"#);
    let kvs = Arc::new(MemoryKvs::new());
    let deps = WorkerDeps {
        run_store: run_store.clone(),
        kvs: kvs.clone(),
        agents: backend,
        checkpointer: Arc::new(MemorySaver::new()),
        workspace_dir: std::env::temp_dir().join("hadron-norepo"),
    };

    let result = run_worker("CR-norepo1", deps).await;
    assert!(result.is_err());
    let run = run_store.get("CR-norepo1").await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run
        .error
        .as_deref()
        .unwrap_or("")
        .contains("No affected repositories"));

    let bus = EventBus::new(kvs as Arc<dyn Kvs>);
    let (events, _) = bus.replay("CR-norepo1", "0").await.unwrap();
    assert_eq!(
        events.last().unwrap().event_type,
        EventType::PipelineFailed
    );
}

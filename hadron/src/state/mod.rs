//! Pipeline state: the central record flowing through every graph node.
//!
//! Fields come in three kinds (mirrored by [`StateUpdate`]):
//! - *overwriting*: last writer wins (`Option<T>` in the update),
//! - *accumulating*: combined by addition/append (bare values in the update),
//! - *control*: `status`, `error`, `intervention`.
//!
//! [`PipelineState::apply`] is the reducer table; the graph engine calls it
//! for every node's returned update instead of merging ad hoc.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::config::ConfigSnapshot;
use crate::cr::StructuredChangeRequest;
use crate::graph::GraphState;

/// Run status, shared between the pipeline state and the CR-run store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "paused" => Some(RunStatus::Paused),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-repo context assembled during pipeline execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RepoContext {
    pub repo_url: String,
    pub repo_name: String,
    pub default_branch: String,
    /// Absolute worktree path once worktree setup has run.
    #[serde(default)]
    pub worktree_path: String,
    /// Contents of AGENTS.md / CLAUDE.md when present.
    #[serde(default)]
    pub agents_md: String,
    #[serde(default)]
    pub directory_tree: String,
    pub test_command: String,
    pub language: String,
}

/// Behaviour spec status for a single repo.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BehaviourSpec {
    pub repo_name: String,
    pub verified: bool,
    #[serde(default)]
    pub verification_feedback: String,
    pub verification_iteration: u32,
}

/// TDD development result for a single repo.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DevResult {
    pub repo_name: String,
    #[serde(default)]
    pub test_output: String,
    pub tests_passing: bool,
    pub dev_iteration: u32,
}

/// One reviewer observation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub line: u64,
    #[serde(default)]
    pub message: String,
}

impl Finding {
    /// Critical and major findings block the review.
    pub fn is_blocking(&self) -> bool {
        matches!(self.severity.as_str(), "critical" | "major")
    }
}

/// Code review result for a single repo.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ReviewResult {
    pub repo_name: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    pub review_passed: bool,
    pub review_iteration: u32,
}

/// Delivery verification result for a single repo.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryResult {
    pub repo_name: String,
    #[serde(default)]
    pub test_output: String,
    pub tests_passing: bool,
    pub branch_pushed: bool,
    #[serde(default)]
    pub pr_url: String,
}

/// One entry in the accumulated stage history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub stage: String,
    pub status: String,
}

impl StageRecord {
    pub fn completed(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            status: "completed".to_string(),
        }
    }

    pub fn failed(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            status: "failed".to_string(),
        }
    }
}

/// Central state object carried through all pipeline nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineState {
    // --- CR source ---
    pub cr_id: String,
    pub source: String,
    #[serde(default)]
    pub external_id: String,
    #[serde(default)]
    pub external_url: String,

    // --- Change request ---
    #[serde(default)]
    pub raw_cr_title: String,
    #[serde(default)]
    pub raw_cr_text: String,
    #[serde(default)]
    pub structured_cr: StructuredChangeRequest,

    // --- Repo context ---
    #[serde(default)]
    pub affected_repos: Vec<RepoContext>,

    // --- Behaviour ---
    #[serde(default)]
    pub behaviour_specs: Vec<BehaviourSpec>,
    #[serde(default)]
    pub behaviour_verified: bool,
    #[serde(default)]
    pub verification_loop_count: u32,

    // --- Development ---
    #[serde(default)]
    pub dev_results: Vec<DevResult>,
    #[serde(default)]
    pub dev_loop_count: u32,

    // --- Review ---
    #[serde(default)]
    pub review_results: Vec<ReviewResult>,
    #[serde(default)]
    pub review_passed: bool,
    #[serde(default)]
    pub review_loop_count: u32,

    // --- Rebase ---
    #[serde(default = "default_true")]
    pub rebase_clean: bool,
    #[serde(default)]
    pub rebase_conflicts: Vec<String>,

    // --- Delivery / release ---
    #[serde(default)]
    pub delivery_results: Vec<DeliveryResult>,
    #[serde(default)]
    pub all_delivered: bool,
    #[serde(default)]
    pub release_approved: bool,

    // --- Cost (accumulating) ---
    #[serde(default)]
    pub cost_input_tokens: u64,
    #[serde(default)]
    pub cost_output_tokens: u64,
    #[serde(default)]
    pub cost_usd: f64,

    // --- Config snapshot (frozen at trigger) ---
    #[serde(default)]
    pub config_snapshot: ConfigSnapshot,

    // --- Control ---
    #[serde(default)]
    pub intervention: Option<String>,
    #[serde(default)]
    pub current_stage: String,
    pub status: RunStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stage_history: Vec<StageRecord>,
}

fn default_true() -> bool {
    true
}

impl PipelineState {
    /// Fresh state for a new run.
    pub fn new(cr_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            cr_id: cr_id.into(),
            source: source.into(),
            external_id: String::new(),
            external_url: String::new(),
            raw_cr_title: String::new(),
            raw_cr_text: String::new(),
            structured_cr: StructuredChangeRequest::default(),
            affected_repos: Vec::new(),
            behaviour_specs: Vec::new(),
            behaviour_verified: false,
            verification_loop_count: 0,
            dev_results: Vec::new(),
            dev_loop_count: 0,
            review_results: Vec::new(),
            review_passed: false,
            review_loop_count: 0,
            rebase_clean: true,
            rebase_conflicts: Vec::new(),
            delivery_results: Vec::new(),
            all_delivered: false,
            release_approved: false,
            cost_input_tokens: 0,
            cost_output_tokens: 0,
            cost_usd: 0.0,
            config_snapshot: ConfigSnapshot::default(),
            intervention: None,
            current_stage: String::new(),
            status: RunStatus::Running,
            error: None,
            stage_history: Vec::new(),
        }
    }
}

/// Partial state update returned by a node.
///
/// `Option<T>` fields overwrite when set (last writer wins); bare numeric
/// fields add; `stage_history` appends.
#[derive(Clone, Debug, Default)]
pub struct StateUpdate {
    pub structured_cr: Option<StructuredChangeRequest>,
    pub affected_repos: Option<Vec<RepoContext>>,
    pub behaviour_specs: Option<Vec<BehaviourSpec>>,
    pub behaviour_verified: Option<bool>,
    pub verification_loop_count: Option<u32>,
    pub dev_results: Option<Vec<DevResult>>,
    pub dev_loop_count: Option<u32>,
    pub review_results: Option<Vec<ReviewResult>>,
    pub review_passed: Option<bool>,
    pub review_loop_count: Option<u32>,
    pub rebase_clean: Option<bool>,
    pub rebase_conflicts: Option<Vec<String>>,
    pub delivery_results: Option<Vec<DeliveryResult>>,
    pub all_delivered: Option<bool>,
    pub release_approved: Option<bool>,
    pub intervention: Option<Option<String>>,
    pub current_stage: Option<String>,
    pub status: Option<RunStatus>,
    pub error: Option<String>,

    // Accumulating fields.
    pub cost_input_tokens: u64,
    pub cost_output_tokens: u64,
    pub cost_usd: f64,
    pub stage_history: Vec<StageRecord>,
}

impl StateUpdate {
    pub fn stage(stage: &str) -> Self {
        Self {
            current_stage: Some(stage.to_string()),
            ..Default::default()
        }
    }

    /// Builds an update from the JSON override map stored by the resume
    /// endpoint. Only known override keys are honored.
    pub fn from_overrides(overrides: &serde_json::Map<String, Value>) -> Self {
        let mut update = StateUpdate::default();
        for (key, value) in overrides {
            match key.as_str() {
                "behaviour_verified" => update.behaviour_verified = value.as_bool(),
                "review_passed" => update.review_passed = value.as_bool(),
                "rebase_clean" => update.rebase_clean = value.as_bool(),
                "all_delivered" => update.all_delivered = value.as_bool(),
                "release_approved" => update.release_approved = value.as_bool(),
                "error" => update.error = value.as_str().map(str::to_string),
                _ => {}
            }
        }
        update
    }
}

impl GraphState for PipelineState {
    type Update = StateUpdate;

    fn apply(&mut self, update: StateUpdate) {
        // Overwriting fields: last writer wins.
        if let Some(v) = update.structured_cr {
            self.structured_cr = v;
        }
        if let Some(v) = update.affected_repos {
            self.affected_repos = v;
        }
        if let Some(v) = update.behaviour_specs {
            self.behaviour_specs = v;
        }
        if let Some(v) = update.behaviour_verified {
            self.behaviour_verified = v;
        }
        if let Some(v) = update.verification_loop_count {
            self.verification_loop_count = v;
        }
        if let Some(v) = update.dev_results {
            self.dev_results = v;
        }
        if let Some(v) = update.dev_loop_count {
            self.dev_loop_count = v;
        }
        if let Some(v) = update.review_results {
            self.review_results = v;
        }
        if let Some(v) = update.review_passed {
            self.review_passed = v;
        }
        if let Some(v) = update.review_loop_count {
            self.review_loop_count = v;
        }
        if let Some(v) = update.rebase_clean {
            self.rebase_clean = v;
        }
        if let Some(v) = update.rebase_conflicts {
            self.rebase_conflicts = v;
        }
        if let Some(v) = update.delivery_results {
            self.delivery_results = v;
        }
        if let Some(v) = update.all_delivered {
            self.all_delivered = v;
        }
        if let Some(v) = update.release_approved {
            self.release_approved = v;
        }
        if let Some(v) = update.intervention {
            self.intervention = v;
        }
        if let Some(v) = update.current_stage {
            self.current_stage = v;
        }
        if let Some(v) = update.status {
            self.status = v;
        }
        if let Some(v) = update.error {
            self.error = Some(v);
        }

        // Accumulating fields: combine, never overwrite.
        self.cost_input_tokens += update.cost_input_tokens;
        self.cost_output_tokens += update.cost_output_tokens;
        self.cost_usd += update.cost_usd;
        self.stage_history.extend(update.stage_history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PipelineState {
        PipelineState::new("CR-test0001", "api")
    }

    /// **Scenario**: cost fields accumulate across updates and never decrease.
    #[test]
    fn cost_fields_accumulate() {
        let mut s = state();
        s.apply(StateUpdate {
            cost_usd: 0.25,
            cost_input_tokens: 100,
            cost_output_tokens: 50,
            ..Default::default()
        });
        s.apply(StateUpdate {
            cost_usd: 0.75,
            cost_input_tokens: 10,
            cost_output_tokens: 5,
            ..Default::default()
        });
        assert!((s.cost_usd - 1.0).abs() < 1e-9);
        assert_eq!(s.cost_input_tokens, 110);
        assert_eq!(s.cost_output_tokens, 55);
    }

    /// **Scenario**: stage history appends while overwriting fields take the last value.
    #[test]
    fn stage_history_appends_and_flags_overwrite() {
        let mut s = state();
        s.apply(StateUpdate {
            behaviour_verified: Some(false),
            stage_history: vec![StageRecord::completed("verification")],
            ..Default::default()
        });
        s.apply(StateUpdate {
            behaviour_verified: Some(true),
            stage_history: vec![StageRecord::completed("tdd")],
            ..Default::default()
        });
        assert!(s.behaviour_verified);
        assert_eq!(s.stage_history.len(), 2);
        assert_eq!(s.stage_history[0].stage, "verification");
    }

    /// **Scenario**: an empty update leaves all overwriting fields untouched.
    #[test]
    fn empty_update_is_identity_for_overwriting_fields() {
        let mut s = state();
        s.review_passed = true;
        s.apply(StateUpdate::default());
        assert!(s.review_passed);
        assert_eq!(s.status, RunStatus::Running);
    }

    #[test]
    fn overrides_parse_known_keys_only() {
        let overrides: serde_json::Map<String, Value> = serde_json::from_str(
            r#"{"review_passed": true, "rebase_clean": false, "mystery": 1}"#,
        )
        .unwrap();
        let update = StateUpdate::from_overrides(&overrides);
        assert_eq!(update.review_passed, Some(true));
        assert_eq!(update.rebase_clean, Some(false));
        assert_eq!(update.behaviour_verified, None);
    }

    #[test]
    fn state_round_trips_through_serde() {
        let mut s = state();
        s.affected_repos.push(RepoContext {
            repo_url: "file:///tmp/r".into(),
            repo_name: "r".into(),
            default_branch: "main".into(),
            test_command: "pytest".into(),
            language: "python".into(),
            ..Default::default()
        });
        let json = serde_json::to_string(&s).unwrap();
        let back: PipelineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cr_id, "CR-test0001");
        assert_eq!(back.affected_repos.len(), 1);
        assert_eq!(back.status, RunStatus::Running);
    }
}

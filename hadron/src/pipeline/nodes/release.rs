//! Release gate and release nodes. The gate auto-approves in this design;
//! release emits events for the already-pushed branches and has no other
//! external effect.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::HadronError;
use crate::git::WorktreeManager;
use crate::graph::Node;
use crate::state::{PipelineState, StageRecord, StateUpdate};

use super::NodeContext;

const GATE_STAGE: &str = "release_gate";
const RELEASE_STAGE: &str = "release";

pub struct ReleaseGateNode {
    ctx: Arc<NodeContext>,
}

impl ReleaseGateNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for ReleaseGateNode {
    fn id(&self) -> &str {
        GATE_STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        self.ctx.stage_entered(GATE_STAGE).await?;

        info!(
            cr_id = %state.cr_id,
            title = %state.structured_cr.title,
            all_delivered = state.all_delivered,
            "release gate (auto-approve)"
        );

        self.ctx
            .stage_completed(GATE_STAGE, json!({"approved": true, "mode": "auto_approve"}))
            .await?;

        Ok(StateUpdate {
            release_approved: Some(true),
            current_stage: Some(GATE_STAGE.to_string()),
            stage_history: vec![StageRecord::completed(GATE_STAGE)],
            ..Default::default()
        })
    }
}

pub struct ReleaseNode {
    ctx: Arc<NodeContext>,
}

impl ReleaseNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for ReleaseNode {
    fn id(&self) -> &str {
        RELEASE_STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        self.ctx.stage_entered(RELEASE_STAGE).await?;

        let branch = WorktreeManager::branch_name(&state.cr_id);
        let repos: Vec<&str> = state
            .affected_repos
            .iter()
            .map(|r| r.repo_name.as_str())
            .collect();
        self.ctx
            .stage_completed(
                RELEASE_STAGE,
                json!({"branch": branch, "repos": repos, "all_delivered": state.all_delivered}),
            )
            .await?;

        Ok(StateUpdate {
            current_stage: Some(RELEASE_STAGE.to_string()),
            stage_history: vec![StageRecord::completed(RELEASE_STAGE)],
            ..Default::default()
        })
    }
}

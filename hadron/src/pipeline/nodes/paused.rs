//! Terminal node for circuit-breaker pauses.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HadronError;
use crate::graph::Node;
use crate::state::{PipelineState, RunStatus, StageRecord, StateUpdate};

use super::NodeContext;

const STAGE: &str = "paused";

pub struct PausedNode {
    ctx: Arc<NodeContext>,
}

impl PausedNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Human-readable reason for the pause, derived from where the run was.
    fn pause_reason(state: &PipelineState) -> String {
        if let Some(error) = &state.error {
            return error.clone();
        }
        if !state.rebase_clean {
            return format!(
                "Rebase conflicts in: {}",
                state.rebase_conflicts.join(", ")
            );
        }
        if !state.behaviour_verified
            && state.verification_loop_count
                >= state.config_snapshot.pipeline.max_verification_loops
        {
            return format!(
                "Verification circuit breaker tripped after {} loops",
                state.verification_loop_count
            );
        }
        if !state.review_passed
            && state.review_loop_count >= state.config_snapshot.pipeline.max_review_dev_loops
        {
            return format!(
                "Review circuit breaker tripped after {} loops",
                state.review_loop_count
            );
        }
        "Pipeline paused".to_string()
    }
}

#[async_trait]
impl Node<PipelineState> for PausedNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let reason = Self::pause_reason(&state);
        self.ctx.stage_entered(STAGE).await?;
        Ok(StateUpdate {
            status: Some(RunStatus::Paused),
            error: Some(reason),
            current_stage: Some(STAGE.to_string()),
            stage_history: vec![StageRecord {
                stage: STAGE.to_string(),
                status: "paused".to_string(),
            }],
            ..Default::default()
        })
    }
}

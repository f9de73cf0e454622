//! Retrospective node: logs run totals and emits the terminal
//! pipeline_completed event.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::error::HadronError;
use crate::event::EventType;
use crate::graph::Node;
use crate::state::{PipelineState, RunStatus, StageRecord, StateUpdate};

use super::NodeContext;

const STAGE: &str = "retrospective";

pub struct RetrospectiveNode {
    ctx: Arc<NodeContext>,
}

impl RetrospectiveNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for RetrospectiveNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        ctx.stage_entered(STAGE).await?;

        info!(
            cr_id = %state.cr_id,
            title = %state.structured_cr.title,
            dev_loops = state.dev_loop_count,
            review_loops = state.review_loop_count,
            verification_loops = state.verification_loop_count,
            cost_usd = state.cost_usd,
            "retrospective"
        );

        ctx.emit(
            EventType::PipelineCompleted,
            STAGE,
            json!({
                "title": state.structured_cr.title,
                "dev_loops": state.dev_loop_count,
                "review_loops": state.review_loop_count,
                "cost_usd": state.cost_usd,
                "all_delivered": state.all_delivered,
            }),
        )
        .await?;

        Ok(StateUpdate {
            status: Some(RunStatus::Completed),
            current_stage: Some(STAGE.to_string()),
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        })
    }
}

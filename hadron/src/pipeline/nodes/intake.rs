//! Intake node: parse the raw CR into a structured change request with a
//! tool-less agent call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::error;

use crate::agent::AgentBackend;
use crate::cr::StructuredChangeRequest;
use crate::error::HadronError;
use crate::graph::Node;
use crate::pipeline::json_extract::extract_json;
use crate::pipeline::PromptComposer;
use crate::state::{PipelineState, StageRecord, StateUpdate};

use super::{
    base_task, emit_agent_completed, emit_agent_started, emit_cost_update, store_conversation,
    take_intervention, NodeContext,
};

const STAGE: &str = "intake";
const ROLE: &str = "intake_parser";

pub struct IntakeNode {
    ctx: Arc<NodeContext>,
}

impl IntakeNode {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<PipelineState> for IntakeNode {
    fn id(&self) -> &str {
        STAGE
    }

    async fn run(&self, state: PipelineState) -> Result<StateUpdate, HadronError> {
        let ctx = &self.ctx;
        ctx.stage_entered(STAGE).await?;

        let composer = PromptComposer::new();
        let system_prompt = composer.compose_system_prompt(ROLE, "");
        let payload = format!(
            "# Change Request\n\n**Title:** {}\n\n**Description:**\n{}",
            state.raw_cr_title, state.raw_cr_text
        );
        let intervention = take_intervention(ctx, STAGE).await.unwrap_or_default();
        let user_prompt = composer.compose_user_prompt(&payload, &intervention);

        let mut task = base_task(ctx, STAGE, ROLE, "", system_prompt, user_prompt);
        task.allowed_tools = Vec::new();

        emit_agent_started(ctx, STAGE, ROLE, "", &task.model, &task.allowed_tools).await?;
        let result = ctx.agents.execute(task).await?;
        emit_cost_update(ctx, STAGE, &result, state.cost_usd).await?;

        let conversation_key = store_conversation(ctx, ROLE, "", &result.conversation).await;

        let structured = match extract_json(&result.output)
            .and_then(|value| serde_json::from_value::<StructuredChangeRequest>(value).ok())
        {
            Some(structured) => structured,
            None => {
                error!(
                    output = super::excerpt(&result.output, 200),
                    "failed to parse intake output as JSON"
                );
                StructuredChangeRequest::parse_failed(&state.raw_cr_title, &state.raw_cr_text)
            }
        };

        emit_agent_completed(ctx, STAGE, ROLE, "", &result, &conversation_key, json!({})).await?;
        ctx.stage_completed(STAGE, json!({"structured_cr": &structured})).await?;

        Ok(StateUpdate {
            structured_cr: Some(structured),
            current_stage: Some(STAGE.to_string()),
            cost_input_tokens: result.input_tokens,
            cost_output_tokens: result.output_tokens,
            cost_usd: result.cost_usd,
            stage_history: vec![StageRecord::completed(STAGE)],
            ..Default::default()
        })
    }
}

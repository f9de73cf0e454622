//! Pipeline node helpers: the shared context handed to every node and the
//! event plumbing around agent invocations.

mod behaviour;
mod delivery;
mod intake;
mod paused;
mod rebase;
mod release;
mod repo_id;
mod retrospective;
mod review;
mod tdd;
mod worktree_setup;

pub use behaviour::{BehaviourTranslationNode, BehaviourVerificationNode};
pub use delivery::DeliveryNode;
pub use intake::IntakeNode;
pub use paused::PausedNode;
pub use rebase::RebaseNode;
pub use release::{ReleaseGateNode, ReleaseNode};
pub use repo_id::RepoIdNode;
pub use retrospective::RetrospectiveNode;
pub use review::ReviewNode;
pub use tdd::TddNode;
pub use worktree_setup::WorktreeSetupNode;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::agent::{
    AgentBackend, AgentEvent, AgentResult, AgentTask, ChatMessage, NudgePoll, OnAgentEvent,
};
use crate::cr::StructuredChangeRequest;
use crate::error::HadronError;
use crate::event::{EventType, PipelineEvent};
use crate::events::{keys, EventBus, InterventionManager};
use crate::git::WorktreeManager;
use crate::kvs::Kvs;

const CONVERSATION_TTL_SECS: u64 = 604_800; // 7 days
const OUTPUT_EXCERPT_CHARS: usize = 2_000;

/// Shared services handed to every pipeline node.
pub struct NodeContext {
    pub cr_id: String,
    pub bus: EventBus,
    pub kvs: Arc<dyn Kvs>,
    pub interventions: InterventionManager,
    pub agents: Arc<dyn AgentBackend>,
    pub worktrees: WorktreeManager,
    /// Model id used for every agent call in this run.
    pub model: String,
    pub explore_model: Option<String>,
    pub plan_model: Option<String>,
}

impl NodeContext {
    pub async fn emit(
        &self,
        event_type: EventType,
        stage: &str,
        data: Value,
    ) -> Result<(), HadronError> {
        let event = PipelineEvent::new(self.cr_id.as_str(), event_type, stage).with_data(data);
        self.bus.emit(&event).await?;
        Ok(())
    }

    pub async fn stage_entered(&self, stage: &str) -> Result<(), HadronError> {
        self.emit(EventType::StageEntered, stage, json!({})).await
    }

    pub async fn stage_completed(&self, stage: &str, data: Value) -> Result<(), HadronError> {
        self.emit(EventType::StageCompleted, stage, data).await
    }
}

/// Char-boundary-safe excerpt for event payloads.
pub(crate) fn excerpt(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Char-boundary-safe tail, for test output where the end matters most.
pub(crate) fn tail(text: &str, chars: usize) -> &str {
    if text.len() <= chars {
        return text;
    }
    let mut start = text.len() - chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Event callback forwarding loop events into the CR's stream. Emission
/// failures are logged, never surfaced into the agent loop.
pub(crate) fn agent_event_forwarder(
    ctx: &Arc<NodeContext>,
    stage: &str,
    role: &str,
    repo: &str,
) -> OnAgentEvent {
    let ctx = ctx.clone();
    let stage = stage.to_string();
    let role = role.to_string();
    let repo = repo.to_string();
    Arc::new(move |event: AgentEvent| {
        let ctx = ctx.clone();
        let stage = stage.clone();
        let role = role.clone();
        let repo = repo.clone();
        Box::pin(async move {
            let (event_type, data) = match event {
                AgentEvent::Output { text, round } => (
                    EventType::AgentOutput,
                    json!({"role": role, "repo": repo, "text": text, "round": round}),
                ),
                AgentEvent::ToolCall { tool, input, round } => (
                    EventType::AgentToolCall,
                    json!({
                        "role": role, "repo": repo, "tool": tool, "input": input,
                        "round": round, "type": "call",
                    }),
                ),
                AgentEvent::ToolResult { tool, result, round } => (
                    EventType::AgentToolCall,
                    json!({
                        "role": role, "repo": repo, "tool": tool, "result": result,
                        "round": round, "type": "result",
                    }),
                ),
                AgentEvent::Nudge { text } => (
                    EventType::AgentNudge,
                    json!({"role": role, "repo": repo, "text": text}),
                ),
                AgentEvent::PhaseStarted { phase, model } => (
                    EventType::AgentOutput,
                    json!({"role": role, "repo": repo, "phase": phase, "model": model, "status": "started"}),
                ),
                AgentEvent::PhaseCompleted { phase } => (
                    EventType::AgentOutput,
                    json!({"role": role, "repo": repo, "phase": phase, "status": "completed"}),
                ),
            };
            if let Err(e) = ctx.emit(event_type, &stage, data).await {
                warn!(error = %e, stage = %stage, "failed to emit agent event");
            }
        })
    })
}

/// Nudge poller bound to one agent role. KVS trouble reads as "no nudge".
pub(crate) fn nudge_poller(ctx: &Arc<NodeContext>, role: &str) -> NudgePoll {
    let ctx = ctx.clone();
    let role = role.to_string();
    Arc::new(move || {
        let ctx = ctx.clone();
        let role = role.clone();
        Box::pin(async move {
            ctx.interventions
                .poll_nudge(&ctx.cr_id, &role)
                .await
                .ok()
                .flatten()
        })
    })
}

/// Stores an agent conversation with a 7-day TTL; returns the key, or an
/// empty string when there was nothing to store.
pub(crate) async fn store_conversation(
    ctx: &NodeContext,
    role: &str,
    repo: &str,
    conversation: &[ChatMessage],
) -> String {
    if conversation.is_empty() {
        return String::new();
    }
    let Ok(payload) = serde_json::to_string(conversation) else {
        return String::new();
    };
    let key = keys::conversation(&ctx.cr_id, role, repo, chrono::Utc::now().timestamp());
    if let Err(e) = ctx
        .kvs
        .set_ex(&key, &payload, std::time::Duration::from_secs(CONVERSATION_TTL_SECS))
        .await
    {
        warn!(error = %e, "failed to store conversation");
        return String::new();
    }
    key
}

pub(crate) async fn emit_cost_update(
    ctx: &NodeContext,
    stage: &str,
    result: &AgentResult,
    prior_cost: f64,
) -> Result<(), HadronError> {
    ctx.emit(
        EventType::CostUpdate,
        stage,
        json!({
            "delta_usd": result.cost_usd,
            "total_cost_usd": prior_cost + result.cost_usd,
            "input_tokens": result.input_tokens,
            "output_tokens": result.output_tokens,
        }),
    )
    .await
}

pub(crate) async fn emit_agent_started(
    ctx: &NodeContext,
    stage: &str,
    role: &str,
    repo: &str,
    model: &str,
    allowed_tools: &[String],
) -> Result<(), HadronError> {
    ctx.emit(
        EventType::AgentStarted,
        stage,
        json!({"role": role, "repo": repo, "model": model, "allowed_tools": allowed_tools}),
    )
    .await
}

pub(crate) async fn emit_agent_completed(
    ctx: &NodeContext,
    stage: &str,
    role: &str,
    repo: &str,
    result: &AgentResult,
    conversation_key: &str,
    extra: Value,
) -> Result<(), HadronError> {
    let mut data = json!({
        "role": role,
        "repo": repo,
        "output": excerpt(&result.output, OUTPUT_EXCERPT_CHARS),
        "input_tokens": result.input_tokens,
        "output_tokens": result.output_tokens,
        "cost_usd": result.cost_usd,
        "tool_calls_count": result.tool_calls.len(),
        "round_count": result.round_count,
        "conversation_key": conversation_key,
    });
    if let (Some(obj), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    ctx.emit(EventType::AgentCompleted, stage, data).await
}

/// Task payload markdown shared by the agent-facing nodes.
pub(crate) fn cr_payload(cr: &StructuredChangeRequest) -> String {
    let criteria = cr
        .acceptance_criteria
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Change Request\n\n**Title:** {}\n**Description:** {}\n\n**Acceptance Criteria:**\n{}\n",
        cr.title, cr.description, criteria
    )
}

/// Consumes a pending operator intervention, emitting an event when found.
pub(crate) async fn take_intervention(ctx: &NodeContext, stage: &str) -> Option<String> {
    let instructions = ctx
        .interventions
        .poll_intervention(&ctx.cr_id)
        .await
        .ok()
        .flatten()?;
    let _ = ctx
        .emit(
            EventType::InterventionSet,
            stage,
            json!({"instructions": instructions, "consumed": true}),
        )
        .await;
    Some(instructions)
}

/// Base task for this run: model and phase configuration from the context,
/// event forwarding and nudge polling wired to the CR.
pub(crate) fn base_task(
    ctx: &Arc<NodeContext>,
    stage: &str,
    role: &str,
    repo: &str,
    system_prompt: String,
    user_prompt: String,
) -> AgentTask {
    AgentTask::new(role, system_prompt, user_prompt)
        .with_model(ctx.model.clone())
        .with_phases(ctx.explore_model.clone(), ctx.plan_model.clone())
        .with_on_event(agent_event_forwarder(ctx, stage, role, repo))
        .with_nudge_poll(nudge_poller(ctx, role))
}

//! Agent task and result types, plus the backend capability trait.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::HadronError;
use crate::tools::ALL_TOOLS;

use super::wire::ChatMessage;

pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

/// Async callback invoked for every loop event.
pub type OnAgentEvent = Arc<dyn Fn(AgentEvent) -> BoxFuture<()> + Send + Sync>;

/// Async callback polled between tool-use rounds; `Some` injects a nudge.
pub type NudgePoll = Arc<dyn Fn() -> BoxFuture<Option<String>> + Send + Sync>;

/// Events surfaced by the tool-use loop while an agent runs.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Output { text: String, round: u32 },
    ToolCall { tool: String, input: Value, round: u32 },
    ToolResult { tool: String, result: String, round: u32 },
    Nudge { text: String },
    PhaseStarted { phase: String, model: String },
    PhaseCompleted { phase: String },
}

/// Streaming wrapper: loop events plus a final `done`.
#[derive(Clone, Debug)]
pub struct AgentStreamEvent {
    pub event_type: String,
    pub data: Value,
}

/// Task definition for one agent invocation.
#[derive(Clone)]
pub struct AgentTask {
    pub role: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub working_directory: Option<PathBuf>,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub max_tokens: u32,
    pub max_tool_rounds: u32,
    /// When set, run a read-only Explore phase under this model first.
    pub explore_model: Option<String>,
    /// When set, run a tool-less Plan call between Explore and Act.
    pub plan_model: Option<String>,
    pub on_event: Option<OnAgentEvent>,
    pub nudge_poll: Option<NudgePoll>,
}

impl AgentTask {
    pub fn new(
        role: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            working_directory: None,
            allowed_tools: ALL_TOOLS.iter().map(|s| s.to_string()).collect(),
            model: "claude-3-5-sonnet-20240620".to_string(),
            max_tokens: 16_384,
            max_tool_rounds: 50,
            explore_model: None,
            plan_model: None,
            on_event: None,
            nudge_poll: None,
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_phases(mut self, explore: Option<String>, plan: Option<String>) -> Self {
        self.explore_model = explore;
        self.plan_model = plan;
        self
    }

    pub fn with_on_event(mut self, on_event: OnAgentEvent) -> Self {
        self.on_event = Some(on_event);
        self
    }

    pub fn with_nudge_poll(mut self, poll: NudgePoll) -> Self {
        self.nudge_poll = Some(poll);
        self
    }

    /// Copy with a different model id, used by the provider chain when it
    /// fails over to a provider that cannot serve the natural model.
    pub fn with_substituted_model(&self, model: &str) -> Self {
        let mut task = self.clone();
        task.model = model.to_string();
        task
    }
}

impl fmt::Debug for AgentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTask")
            .field("role", &self.role)
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .field("allowed_tools", &self.allowed_tools)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .field("explore_model", &self.explore_model)
            .field("plan_model", &self.plan_model)
            .finish()
    }
}

/// One tool invocation performed during a run.
#[derive(Clone, Debug, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: Value,
}

/// Result from an agent invocation.
#[derive(Clone, Debug, Default)]
pub struct AgentResult {
    pub output: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Serialized Act-phase conversation, suitable for storage.
    pub conversation: Vec<ChatMessage>,
    /// API calls made, summed across phases.
    pub round_count: u32,
}

/// Capability set of an agent backend: execute a task, stream a task, name.
///
/// Implemented by [`ToolUseAgent`](super::ToolUseAgent) for each provider
/// and by [`ProviderChain`](super::ProviderChain), so pipeline nodes call a
/// chain exactly as they would a single backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Runs the task to completion.
    async fn execute(&self, task: AgentTask) -> Result<AgentResult, HadronError>;

    /// Runs the task, pushing loop events into `tx` as they happen, and
    /// returns the final result. The default implementation forwards the
    /// task's event callback into the channel and finishes with a `done`.
    async fn stream(
        &self,
        task: AgentTask,
        tx: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<AgentResult, HadronError> {
        let forward_tx = tx.clone();
        let prior = task.on_event.clone();
        let mut task = task;
        task.on_event = Some(Arc::new(move |event: AgentEvent| {
            let forward_tx = forward_tx.clone();
            let prior = prior.clone();
            Box::pin(async move {
                if let Some(prior) = prior {
                    prior(event.clone()).await;
                }
                let (event_type, data) = match event {
                    AgentEvent::Output { text, round } => {
                        ("text_delta", serde_json::json!({"text": text, "round": round}))
                    }
                    AgentEvent::ToolCall { tool, input, round } => {
                        ("tool_use", serde_json::json!({"name": tool, "input": input, "round": round}))
                    }
                    AgentEvent::ToolResult { tool, result, round } => {
                        ("tool_result", serde_json::json!({"name": tool, "result": result, "round": round}))
                    }
                    AgentEvent::Nudge { text } => ("nudge", serde_json::json!({"text": text})),
                    AgentEvent::PhaseStarted { phase, model } => {
                        ("phase_started", serde_json::json!({"phase": phase, "model": model}))
                    }
                    AgentEvent::PhaseCompleted { phase } => {
                        ("phase_completed", serde_json::json!({"phase": phase}))
                    }
                };
                let _ = forward_tx
                    .send(AgentStreamEvent {
                        event_type: event_type.to_string(),
                        data,
                    })
                    .await;
            })
        }));
        let result = self.execute(task).await?;
        let _ = tx
            .send(AgentStreamEvent {
                event_type: "done".to_string(),
                data: serde_json::json!({}),
            })
            .await;
        Ok(result)
    }
}

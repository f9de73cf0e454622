//! The tool-use loop: drives a conversation with any [`ChatApi`] provider,
//! executing tool calls through the sandboxed executor between rounds.
//!
//! Single-phase by default. When a task carries `explore_model` /
//! `plan_model`, execution becomes Explore → Plan → Act: a read-only
//! exploration loop, a single tool-less planning call, then the normal
//! loop with a user prompt composed from plan + exploration + task. Costs
//! are computed per phase with that phase's model and summed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::model_cost;
use crate::error::HadronError;
use crate::tools::{tool_specs, ToolExecutor, READ_ONLY_TOOLS};

use super::task::{
    AgentBackend, AgentEvent, AgentResult, AgentTask, NudgePoll, OnAgentEvent, ToolCallRecord,
};
use super::wire::{ChatApi, ChatMessage, ChatRequest, ChatTurn, ContentBlock, StopReason};

const RATE_LIMIT_MAX_RETRIES: u32 = 5;
const RATE_LIMIT_BASE_WAIT: Duration = Duration::from_secs(60);

/// Cap applied to tool results inside emitted events (the real result is
/// still fed to the model untruncated).
const EVENT_RESULT_CAP: usize = 10_000;

const EXPLORE_SYSTEM_PROMPT: &str = "You are an exploration agent. Survey the repository with the \
read-only tools provided and produce a concise summary of the files, structure and conventions \
relevant to the task. Do not propose changes.";

const PLAN_SYSTEM_PROMPT: &str = "You are a planning agent. Given an exploration summary and a \
task, produce a short, concrete, step-by-step implementation plan. Do not write code.";

/// Agent backend implementing the tool-use loop over one provider.
pub struct ToolUseAgent {
    api: Arc<dyn ChatApi>,
    rate_limit_base: Duration,
}

struct PhaseOutcome {
    final_text: String,
    input_tokens: u64,
    output_tokens: u64,
    tool_calls: Vec<ToolCallRecord>,
    messages: Vec<ChatMessage>,
    rounds: u32,
}

fn phase_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let (rate_in, rate_out) = model_cost(model);
    (input_tokens as f64 * rate_in + output_tokens as f64 * rate_out) / 1_000_000.0
}

async fn emit(on_event: Option<&OnAgentEvent>, event: AgentEvent) {
    if let Some(cb) = on_event {
        cb(event).await;
    }
}

fn truncate_str(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

impl ToolUseAgent {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self {
            api,
            rate_limit_base: RATE_LIMIT_BASE_WAIT,
        }
    }

    /// Shrinks the rate-limit backoff base. Used by tests.
    pub fn with_rate_limit_base(mut self, base: Duration) -> Self {
        self.rate_limit_base = base;
        self
    }

    /// One provider call with linear-backoff rate-limit retry:
    /// wait = base × (attempt + 1), up to five attempts.
    async fn call_with_retry(
        &self,
        request: ChatRequest,
        on_event: Option<&OnAgentEvent>,
        round: u32,
    ) -> Result<ChatTurn, HadronError> {
        let mut last_rate_limit = String::new();
        for attempt in 0..RATE_LIMIT_MAX_RETRIES {
            match self.api.chat(request.clone()).await {
                Ok(turn) => return Ok(turn),
                Err(e) if e.is_rate_limit() => {
                    last_rate_limit = e.to_string();
                    if attempt + 1 == RATE_LIMIT_MAX_RETRIES {
                        break;
                    }
                    let wait = self.rate_limit_base * (attempt + 1);
                    warn!(
                        provider = self.api.provider(),
                        attempt = attempt + 1,
                        wait_secs = wait.as_secs(),
                        "rate limited, backing off"
                    );
                    emit(
                        on_event,
                        AgentEvent::Output {
                            text: format!(
                                "[Rate limited — waiting {}s before retrying...]",
                                wait.as_secs()
                            ),
                            round,
                        },
                    )
                    .await;
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    return Err(HadronError::Provider {
                        provider: self.api.provider().to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
        Err(HadronError::RateLimitExhausted {
            provider: self.api.provider().to_string(),
            message: last_rate_limit,
        })
    }

    /// One conversation loop: call the provider, run tool calls, feed back
    /// results, poll for nudges, until the model stops asking for tools or
    /// the round budget runs out.
    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        allowed_tools: &[String],
        max_tokens: u32,
        max_rounds: u32,
        executor: Option<&ToolExecutor>,
        on_event: Option<&OnAgentEvent>,
        nudge_poll: Option<&NudgePoll>,
    ) -> Result<PhaseOutcome, HadronError> {
        let tools = tool_specs(allowed_tools);
        let mut messages = vec![ChatMessage::user_text(user_prompt)];
        let mut final_text = String::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut tool_calls = Vec::new();
        let mut rounds = 0u32;

        for round in 0..max_rounds {
            let request = ChatRequest {
                model: model.to_string(),
                system: system_prompt.to_string(),
                tools: tools.clone(),
                messages: messages.clone(),
                max_tokens,
            };
            let turn = self.call_with_retry(request, on_event, round).await?;
            rounds = round + 1;
            input_tokens += turn.input_tokens;
            output_tokens += turn.output_tokens;

            let text_parts: Vec<&str> = turn
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect();
            if !text_parts.is_empty() {
                final_text = text_parts.join("\n");
                emit(
                    on_event,
                    AgentEvent::Output {
                        text: final_text.clone(),
                        round,
                    },
                )
                .await;
            }

            let tool_uses: Vec<(String, String, serde_json::Value)> = turn
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if tool_uses.is_empty() {
                break;
            }

            messages.push(ChatMessage::assistant(turn.content.clone()));

            let mut results = Vec::with_capacity(tool_uses.len());
            for (id, name, input) in tool_uses {
                info!(tool = %name, round, "tool call");
                emit(
                    on_event,
                    AgentEvent::ToolCall {
                        tool: name.clone(),
                        input: input.clone(),
                        round,
                    },
                )
                .await;
                tool_calls.push(ToolCallRecord {
                    name: name.clone(),
                    input: input.clone(),
                });

                let result_text = if !allowed_tools.iter().any(|t| t == &name) {
                    format!("Error: tool not allowed: {name}")
                } else if let Some(executor) = executor {
                    executor.execute(&name, &input).await
                } else {
                    format!("Error: tool not available: {name}")
                };

                emit(
                    on_event,
                    AgentEvent::ToolResult {
                        tool: name.clone(),
                        result: truncate_str(&result_text, EVENT_RESULT_CAP),
                        round,
                    },
                )
                .await;

                results.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    name,
                    content: result_text,
                });
            }
            messages.push(ChatMessage::tool_results(results));

            if turn.stop_reason == StopReason::EndTurn {
                break;
            }

            // Between rounds: consume a pending nudge, if any.
            if let Some(poll) = nudge_poll {
                if let Some(nudge) = poll().await {
                    emit(on_event, AgentEvent::Nudge { text: nudge.clone() }).await;
                    messages.push(ChatMessage::user_text(nudge));
                }
            }
        }

        Ok(PhaseOutcome {
            final_text,
            input_tokens,
            output_tokens,
            tool_calls,
            messages,
            rounds,
        })
    }
}

#[async_trait]
impl AgentBackend for ToolUseAgent {
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult, HadronError> {
        let executor = task
            .working_directory
            .as_ref()
            .map(|dir| ToolExecutor::new(dir.clone()));
        let on_event = task.on_event.as_ref();
        let nudge_poll = task.nudge_poll.as_ref();
        let three_phase = task.explore_model.is_some() || task.plan_model.is_some();

        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut cost_usd = 0.0f64;
        let mut tool_calls = Vec::new();
        let mut rounds = 0u32;

        let mut exploration: Option<String> = None;
        if let Some(explore_model) = task.explore_model.clone() {
            emit(
                on_event,
                AgentEvent::PhaseStarted {
                    phase: "explore".to_string(),
                    model: explore_model.clone(),
                },
            )
            .await;
            let read_only: Vec<String> = task
                .allowed_tools
                .iter()
                .filter(|t| READ_ONLY_TOOLS.contains(&t.as_str()))
                .cloned()
                .collect();
            let outcome = self
                .run_loop(
                    &explore_model,
                    EXPLORE_SYSTEM_PROMPT,
                    &task.user_prompt,
                    &read_only,
                    task.max_tokens,
                    task.max_tool_rounds,
                    executor.as_ref(),
                    on_event,
                    nudge_poll,
                )
                .await?;
            cost_usd += phase_cost(&explore_model, outcome.input_tokens, outcome.output_tokens);
            input_tokens += outcome.input_tokens;
            output_tokens += outcome.output_tokens;
            rounds += outcome.rounds;
            tool_calls.extend(outcome.tool_calls);
            exploration = Some(outcome.final_text);
            emit(
                on_event,
                AgentEvent::PhaseCompleted {
                    phase: "explore".to_string(),
                },
            )
            .await;
        }

        let mut plan: Option<String> = None;
        if let Some(plan_model) = task.plan_model.clone() {
            emit(
                on_event,
                AgentEvent::PhaseStarted {
                    phase: "plan".to_string(),
                    model: plan_model.clone(),
                },
            )
            .await;
            let plan_prompt = match &exploration {
                Some(summary) => format!(
                    "# Exploration Summary\n\n{summary}\n\n# Task\n\n{}",
                    task.user_prompt
                ),
                None => task.user_prompt.clone(),
            };
            let outcome = self
                .run_loop(
                    &plan_model,
                    PLAN_SYSTEM_PROMPT,
                    &plan_prompt,
                    &[],
                    task.max_tokens,
                    1,
                    None,
                    on_event,
                    None,
                )
                .await?;
            cost_usd += phase_cost(&plan_model, outcome.input_tokens, outcome.output_tokens);
            input_tokens += outcome.input_tokens;
            output_tokens += outcome.output_tokens;
            rounds += outcome.rounds;
            plan = Some(outcome.final_text);
            emit(
                on_event,
                AgentEvent::PhaseCompleted {
                    phase: "plan".to_string(),
                },
            )
            .await;
        }

        let act_prompt = match (&plan, &exploration) {
            (None, None) => task.user_prompt.clone(),
            _ => {
                let mut prompt = String::new();
                if let Some(plan) = &plan {
                    prompt.push_str(&format!("# Implementation Plan\n\n{plan}\n\n"));
                }
                if let Some(summary) = &exploration {
                    prompt.push_str(&format!("# Exploration Summary\n\n{summary}\n\n"));
                }
                prompt.push_str(&format!("# Task\n\n{}", task.user_prompt));
                prompt
            }
        };

        if three_phase {
            emit(
                on_event,
                AgentEvent::PhaseStarted {
                    phase: "act".to_string(),
                    model: task.model.clone(),
                },
            )
            .await;
        }
        let outcome = self
            .run_loop(
                &task.model,
                &task.system_prompt,
                &act_prompt,
                &task.allowed_tools,
                task.max_tokens,
                task.max_tool_rounds,
                executor.as_ref(),
                on_event,
                nudge_poll,
            )
            .await?;
        cost_usd += phase_cost(&task.model, outcome.input_tokens, outcome.output_tokens);
        input_tokens += outcome.input_tokens;
        output_tokens += outcome.output_tokens;
        rounds += outcome.rounds;
        tool_calls.extend(outcome.tool_calls);
        if three_phase {
            emit(
                on_event,
                AgentEvent::PhaseCompleted {
                    phase: "act".to_string(),
                },
            )
            .await;
        }

        Ok(AgentResult {
            output: outcome.final_text,
            input_tokens,
            output_tokens,
            cost_usd,
            tool_calls,
            conversation: outcome.messages,
            round_count: rounds,
        })
    }
}

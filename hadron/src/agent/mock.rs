//! Mock provider and backend for tests: scripted responses, recorded
//! requests, no network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HadronError;

use super::task::{AgentBackend, AgentResult, AgentTask};
use super::wire::{ChatApi, ChatRequest, ChatTurn, ContentBlock, ProviderError, StopReason};

/// Scripted [`ChatApi`]: pops one pre-programmed turn (or error) per call
/// and records every request it receives.
pub struct MockChatApi {
    name: String,
    script: Mutex<VecDeque<Result<ChatTurn, ProviderError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockChatApi {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A text-only turn ending the conversation.
    pub fn text_turn(text: &str) -> ChatTurn {
        ChatTurn {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            input_tokens: 100,
            output_tokens: 50,
        }
    }

    /// A turn requesting one tool call.
    pub fn tool_turn(tool: &str, input: Value) -> ChatTurn {
        ChatTurn {
            content: vec![
                ContentBlock::Text {
                    text: format!("calling {tool}"),
                },
                ContentBlock::ToolUse {
                    id: format!("tu_{tool}"),
                    name: tool.to_string(),
                    input,
                },
            ],
            stop_reason: StopReason::ToolUse,
            input_tokens: 100,
            output_tokens: 50,
        }
    }

    pub fn push_turn(&self, turn: ChatTurn) -> &Self {
        self.script.lock().unwrap().push_back(Ok(turn));
        self
    }

    pub fn push_rate_limited(&self) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::RateLimited("throttled".into())));
        self
    }

    pub fn push_error(&self, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::Api {
                status: 500,
                message: message.to_string(),
            }));
        self
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatTurn, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Self::text_turn("")))
    }
}

/// Scripted [`AgentBackend`] for pipeline tests: responses queued per agent
/// role, executed tasks recorded.
pub struct MockAgentBackend {
    name: String,
    responses: Mutex<HashMap<String, VecDeque<AgentResult>>>,
    executed: Mutex<Vec<AgentTask>>,
    fail_with: Mutex<Option<String>>,
}

impl MockAgentBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            responses: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Makes a result with plausible token counts for scripted output.
    pub fn result(output: &str) -> AgentResult {
        AgentResult {
            output: output.to_string(),
            input_tokens: 1_000,
            output_tokens: 400,
            cost_usd: 0.009,
            round_count: 1,
            ..Default::default()
        }
    }

    /// Queues one response for a role. Later calls for the same role pop in
    /// FIFO order; an exhausted queue repeats its last response.
    pub fn respond(&self, role: &str, output: &str) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(role.to_string())
            .or_default()
            .push_back(Self::result(output));
        self
    }

    /// Drops any queued responses for a role so a test can rescript it.
    pub fn clear(&self, role: &str) -> &Self {
        self.responses.lock().unwrap().remove(role);
        self
    }

    /// Makes every subsequent execute fail with the given message.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn executed(&self) -> Vec<AgentTask> {
        self.executed.lock().unwrap().clone()
    }

    /// Roles executed so far, in order.
    pub fn executed_roles(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.role.clone())
            .collect()
    }
}

impl Default for MockAgentBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentBackend for MockAgentBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult, HadronError> {
        self.executed.lock().unwrap().push(task.clone());
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(HadronError::Provider {
                provider: self.name.clone(),
                message,
            });
        }
        let mut guard = self.responses.lock().unwrap();
        let queue = guard.entry(task.role.clone()).or_default();
        let result = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_else(|| Self::result("ok"))
        };
        Ok(result)
    }
}

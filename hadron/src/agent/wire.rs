//! Normalized conversation model and the narrow provider interface.
//!
//! Each provider backend translates between these types and its own wire
//! format; everything above this seam (the loop, the chain, the nodes) is
//! provider-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::ToolSpec;

/// Message author.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One content block inside a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// Tool name, carried for providers whose wire format keys results
        /// by function name rather than call id.
        name: String,
        content: String,
    },
}

/// One conversation message. Serializable for conversation storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }
}

/// Why the model stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Result of one completion call.
#[derive(Clone, Debug)]
pub struct ChatTurn {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One completion request: system prompt, tools, and prior messages.
#[derive(Clone, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub tools: Vec<ToolSpec>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Provider call failure, classified so the loop can retry rate limits and
/// the chain can fail over on everything else.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider throttled this call; retry with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("http: {0}")]
    Http(String),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("decode: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// A provider backend is one completion call plus a name. That is the whole
/// contract; wire formats stay inside implementations.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Provider name, e.g. `"anthropic"`.
    fn provider(&self) -> &str;

    /// One completion call.
    async fn chat(&self, request: ChatRequest) -> Result<ChatTurn, ProviderError>;
}

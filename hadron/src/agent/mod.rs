//! Agent runtime: the multi-round tool-use loop between an LLM provider
//! and the sandboxed tool executor, plus provider failover.
//!
//! Providers are consumed through the narrow [`ChatApi`] interface (one
//! completion call in, normalized content blocks out); [`ToolUseAgent`]
//! implements the loop on top of it: rate-limit retry, nudge injection,
//! and the optional Explore → Plan → Act phases work identically for
//! every provider.

mod anthropic;
mod chain;
mod gemini;
pub mod mock;
mod runner;
mod task;
mod wire;

pub use anthropic::AnthropicApi;
pub use chain::{BackendRegistry, ProviderChain, ProviderChainConfig};
pub use gemini::GeminiApi;
pub use runner::ToolUseAgent;
pub use task::{
    AgentBackend, AgentEvent, AgentResult, AgentStreamEvent, AgentTask, NudgePoll, OnAgentEvent,
    ToolCallRecord,
};
pub use wire::{ChatApi, ChatMessage, ChatRequest, ChatTurn, ContentBlock, ProviderError, Role,
    StopReason};

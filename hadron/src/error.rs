//! Execution error types shared across the pipeline.
//!
//! Subsystems define their own focused errors (`KvsError`, `GitError`,
//! `CheckpointError`, `StoreError`, `ProviderError`) which fold into
//! [`HadronError`] at node and driver level.

use thiserror::Error;

use crate::kvs::KvsError;
use crate::memory::CheckpointError;

/// Top-level execution error: anything that can abort a pipeline node or
/// the worker driver.
///
/// **Interaction**: returned by `Node::run`, `AgentBackend::execute`, and
/// `CompiledStateGraph::invoke`; the worker driver converts it into a
/// `failed` run and a `pipeline_failed` event.
#[derive(Debug, Error)]
pub enum HadronError {
    /// Generic execution failure with a message.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A provider call failed for a reason other than rate limiting.
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// Rate-limit retries were exhausted for one provider.
    #[error("rate limit retries exhausted for provider {provider}: {message}")]
    RateLimitExhausted { provider: String, message: String },

    /// Every provider in the chain failed for this task.
    #[error("all providers exhausted for role={role} model={model}. Last error: {last_error}")]
    AllProvidersExhausted {
        role: String,
        model: String,
        last_error: String,
    },

    #[error("kvs: {0}")]
    Kvs(#[from] KvsError),

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("git: {0}")]
    Git(#[from] crate::git::GitError),

    #[error("store: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the all-providers-exhausted message names role, model and the last error.
    #[test]
    fn all_providers_exhausted_display() {
        let err = HadronError::AllProvidersExhausted {
            role: "code_writer".into(),
            model: "claude-3-5-sonnet-20240620".into(),
            last_error: "boom".into(),
        };
        let s = err.to_string();
        assert!(s.contains("all providers exhausted"));
        assert!(s.contains("code_writer"));
        assert!(s.contains("boom"));
    }
}

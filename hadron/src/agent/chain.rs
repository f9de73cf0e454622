//! Provider chain: routes tasks to their natural provider and fails over
//! down the configured chain with model substitution.
//!
//! Pipeline nodes hold the chain as an [`AgentBackend`], so failover is
//! invisible to them. Adding a provider is a new [`ChatApi`] implementation
//! plus one registry entry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::provider_for_model;
use crate::error::HadronError;

use super::task::{AgentBackend, AgentResult, AgentStreamEvent, AgentTask};

/// Instantiated backends keyed by provider name.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn AgentBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its own name.
    pub fn register(&mut self, backend: Arc<dyn AgentBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn AgentBackend>> {
        self.backends.get(provider).cloned()
    }

    pub fn has(&self, provider: &str) -> bool {
        self.backends.contains_key(provider)
    }

    pub fn providers(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

/// Chain order and per-provider fallback models.
#[derive(Clone, Debug)]
pub struct ProviderChainConfig {
    /// Ordered provider names; the first is primary, the rest are fallbacks.
    pub chain: Vec<String>,
    /// When failing over to a provider that cannot serve the task's natural
    /// model, which model to substitute.
    pub fallback_models: HashMap<String, String>,
}

impl Default for ProviderChainConfig {
    fn default() -> Self {
        Self {
            chain: vec!["anthropic".to_string(), "gemini".to_string()],
            fallback_models: [
                ("anthropic".to_string(), "claude-3-5-sonnet-20240620".to_string()),
                ("gemini".to_string(), "gemini-1.5-pro".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }
}

/// Routes agent tasks to backends with automatic failover.
pub struct ProviderChain {
    registry: BackendRegistry,
    config: ProviderChainConfig,
}

impl ProviderChain {
    pub fn new(registry: BackendRegistry, config: ProviderChainConfig) -> Self {
        Self { registry, config }
    }

    /// Ordered providers to try: the model's natural provider first (when
    /// registered), then the configured chain order minus duplicates.
    fn resolve_order(&self, model: &str) -> Vec<String> {
        let natural = provider_for_model(model);
        let mut order = Vec::new();
        if self.registry.has(natural) {
            order.push(natural.to_string());
        }
        for provider in &self.config.chain {
            if !order.contains(provider) && self.registry.has(provider) {
                order.push(provider.clone());
            }
        }
        order
    }

    /// Task adapted for `target_provider`: unchanged when the task's model
    /// naturally belongs there, otherwise the provider's fallback model is
    /// substituted.
    fn adapt_task(&self, task: &AgentTask, target_provider: &str) -> AgentTask {
        if provider_for_model(&task.model) == target_provider {
            return task.clone();
        }
        let Some(fallback) = self.config.fallback_models.get(target_provider) else {
            return task.clone();
        };
        info!(
            from = %task.model,
            to = %fallback,
            provider = target_provider,
            role = %task.role,
            "substituting model for fallback provider"
        );
        task.with_substituted_model(fallback)
    }
}

#[async_trait]
impl AgentBackend for ProviderChain {
    fn name(&self) -> &str {
        "provider_chain"
    }

    async fn execute(&self, task: AgentTask) -> Result<AgentResult, HadronError> {
        let providers = self.resolve_order(&task.model);
        let mut last_error: Option<HadronError> = None;

        for provider in &providers {
            let Some(backend) = self.registry.get(provider) else {
                continue;
            };
            let effective = self.adapt_task(&task, provider);
            match backend.execute(effective).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        provider = %provider,
                        role = %task.role,
                        error = %e,
                        "provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(HadronError::AllProvidersExhausted {
            role: task.role.clone(),
            model: task.model.clone(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers registered".to_string()),
        })
    }

    async fn stream(
        &self,
        task: AgentTask,
        tx: mpsc::Sender<AgentStreamEvent>,
    ) -> Result<AgentResult, HadronError> {
        let providers = self.resolve_order(&task.model);
        let mut last_error: Option<HadronError> = None;

        for provider in &providers {
            let Some(backend) = self.registry.get(provider) else {
                continue;
            };
            let effective = self.adapt_task(&task, provider);
            match backend.stream(effective, tx.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(provider = %provider, role = %task.role, error = %e, "stream failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(HadronError::AllProvidersExhausted {
            role: task.role.clone(),
            model: task.model.clone(),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers registered".to_string()),
        })
    }
}

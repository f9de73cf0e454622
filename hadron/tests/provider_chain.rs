//! Provider chain tests: natural-provider routing, failover with model
//! substitution, and exhaustion.

use std::sync::Arc;

use hadron::agent::mock::MockAgentBackend;
use hadron::agent::{AgentBackend, AgentTask, BackendRegistry, ProviderChain, ProviderChainConfig};
use hadron::error::HadronError;

fn task(model: &str) -> AgentTask {
    AgentTask::new("spec_writer", "system", "write specs").with_model(model)
}

fn chain_with(
    backends: Vec<Arc<MockAgentBackend>>,
) -> ProviderChain {
    let mut registry = BackendRegistry::new();
    for backend in backends {
        registry.register(backend);
    }
    ProviderChain::new(registry, ProviderChainConfig::default())
}

/// **Scenario**: the task's natural provider is tried first and keeps the
/// original model.
#[tokio::test]
async fn natural_provider_first() {
    let anthropic = Arc::new(MockAgentBackend::new().with_name("anthropic"));
    let gemini = Arc::new(MockAgentBackend::new().with_name("gemini"));
    anthropic.respond("spec_writer", "from anthropic");

    let chain = chain_with(vec![anthropic.clone(), gemini.clone()]);
    let result = chain
        .execute(task("claude-3-5-sonnet-20240620"))
        .await
        .unwrap();
    assert_eq!(result.output, "from anthropic");
    assert_eq!(anthropic.executed().len(), 1);
    assert_eq!(anthropic.executed()[0].model, "claude-3-5-sonnet-20240620");
    assert!(gemini.executed().is_empty());

    // Gemini-natural task routes to gemini first.
    gemini.respond("spec_writer", "from gemini");
    let result = chain.execute(task("gemini-1.5-pro")).await.unwrap();
    assert_eq!(result.output, "from gemini");
}

/// **Scenario**: when the natural provider fails, the next provider gets
/// the task with its fallback model substituted.
#[tokio::test]
async fn failover_substitutes_model() {
    let anthropic = Arc::new(MockAgentBackend::new().with_name("anthropic"));
    let gemini = Arc::new(MockAgentBackend::new().with_name("gemini"));
    anthropic.fail_with("anthropic down");
    gemini.respond("spec_writer", "rescued");

    let chain = chain_with(vec![anthropic.clone(), gemini.clone()]);
    let result = chain
        .execute(task("claude-3-5-sonnet-20240620"))
        .await
        .unwrap();

    assert_eq!(result.output, "rescued");
    assert_eq!(anthropic.executed().len(), 1);
    let fallback_task = &gemini.executed()[0];
    assert_eq!(fallback_task.model, "gemini-1.5-pro");
}

/// **Scenario**: every provider failing yields the exhaustion error with
/// the last failure attached.
#[tokio::test]
async fn all_providers_exhausted() {
    let anthropic = Arc::new(MockAgentBackend::new().with_name("anthropic"));
    let gemini = Arc::new(MockAgentBackend::new().with_name("gemini"));
    anthropic.fail_with("first failure");
    gemini.fail_with("second failure");

    let chain = chain_with(vec![anthropic, gemini]);
    let err = chain
        .execute(task("claude-3-5-sonnet-20240620"))
        .await
        .unwrap_err();
    match err {
        HadronError::AllProvidersExhausted { role, last_error, .. } => {
            assert_eq!(role, "spec_writer");
            assert!(last_error.contains("second failure"));
        }
        other => panic!("expected exhaustion, got {other}"),
    }
}

/// **Scenario**: an empty registry exhausts immediately.
#[tokio::test]
async fn empty_registry_is_exhausted() {
    let chain = ProviderChain::new(BackendRegistry::new(), ProviderChainConfig::default());
    let err = chain.execute(task("claude-3-5-sonnet-20240620")).await.unwrap_err();
    assert!(matches!(err, HadronError::AllProvidersExhausted { .. }));
}

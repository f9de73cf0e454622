//! Provider/model registry: cost and capability metadata per model id.
//!
//! **Interaction**: the agent loop looks up per-phase costs here; the
//! provider chain resolves a model's natural provider here (with a prefix
//! fallback for model ids that are not in the registry).

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// Cost and capability metadata for one model.
#[derive(Clone, Debug, Serialize)]
pub struct ModelConfig {
    pub provider: &'static str,
    /// USD per 1M input tokens.
    pub cost_input_1m: f64,
    /// USD per 1M output tokens.
    pub cost_output_1m: f64,
    pub context_window: u64,
    pub supports_tools: bool,
    pub is_experimental: bool,
}

/// Conservative (input, output) USD-per-1M rates for unknown models.
pub const DEFAULT_MODEL_COST: (f64, f64) = (3.00, 15.00);

static REGISTRY: Lazy<HashMap<&'static str, ModelConfig>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        "claude-3-5-sonnet-20240620",
        ModelConfig {
            provider: "anthropic",
            cost_input_1m: 3.00,
            cost_output_1m: 15.00,
            context_window: 200_000,
            supports_tools: true,
            is_experimental: false,
        },
    );
    m.insert(
        "claude-3-opus-20240229",
        ModelConfig {
            provider: "anthropic",
            cost_input_1m: 15.00,
            cost_output_1m: 75.00,
            context_window: 200_000,
            supports_tools: true,
            is_experimental: false,
        },
    );
    m.insert(
        "claude-3-haiku-20240307",
        ModelConfig {
            provider: "anthropic",
            cost_input_1m: 0.25,
            cost_output_1m: 1.25,
            context_window: 200_000,
            supports_tools: true,
            is_experimental: false,
        },
    );
    m.insert(
        "gemini-1.5-pro",
        ModelConfig {
            provider: "gemini",
            cost_input_1m: 1.25,
            cost_output_1m: 5.00,
            context_window: 2_000_000,
            supports_tools: true,
            is_experimental: false,
        },
    );
    m.insert(
        "gemini-1.5-flash",
        ModelConfig {
            provider: "gemini",
            cost_input_1m: 0.075,
            cost_output_1m: 0.30,
            context_window: 1_000_000,
            supports_tools: true,
            is_experimental: false,
        },
    );
    m.insert(
        "gemini-2.0-flash",
        ModelConfig {
            provider: "gemini",
            cost_input_1m: 0.10,
            cost_output_1m: 0.40,
            context_window: 1_000_000,
            supports_tools: true,
            is_experimental: true,
        },
    );
    m
});

/// Registry lookup for a model id.
pub fn model_config(model: &str) -> Option<&'static ModelConfig> {
    REGISTRY.get(model)
}

/// (input, output) USD-per-1M rates for a model; unknown models use the
/// conservative default.
pub fn model_cost(model: &str) -> (f64, f64) {
    model_config(model)
        .map(|c| (c.cost_input_1m, c.cost_output_1m))
        .unwrap_or(DEFAULT_MODEL_COST)
}

/// Natural provider for a model id: registry lookup first, then a
/// documented prefix fallback for ids the registry does not know.
pub fn provider_for_model(model: &str) -> &'static str {
    if let Some(cfg) = model_config(model) {
        return cfg.provider;
    }
    if model.starts_with("claude") {
        "anthropic"
    } else if model.starts_with("gemini") {
        "gemini"
    } else {
        "anthropic"
    }
}

/// Flat model catalog for the `/api/config/models` endpoint.
pub fn list_available_models() -> Vec<serde_json::Value> {
    let mut models: Vec<_> = REGISTRY
        .iter()
        .map(|(id, cfg)| {
            serde_json::json!({
                "id": id,
                "name": id,
                "provider_id": cfg.provider,
                "context_window": cfg.context_window,
                "is_experimental": cfg.is_experimental,
            })
        })
        .collect();
    models.sort_by(|a, b| a["id"].as_str().cmp(&b["id"].as_str()));
    models
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_resolve_their_provider() {
        assert_eq!(provider_for_model("claude-3-haiku-20240307"), "anthropic");
        assert_eq!(provider_for_model("gemini-1.5-pro"), "gemini");
    }

    /// **Scenario**: unknown model ids fall back to the prefix rule.
    #[test]
    fn unknown_models_use_prefix_fallback() {
        assert_eq!(provider_for_model("claude-9-hypothetical"), "anthropic");
        assert_eq!(provider_for_model("gemini-9-hypothetical"), "gemini");
        assert_eq!(provider_for_model("mystery-model"), "anthropic");
    }

    /// **Scenario**: unknown models are billed at the conservative default rate.
    #[test]
    fn unknown_model_cost_is_conservative_default() {
        assert_eq!(model_cost("mystery-model"), DEFAULT_MODEL_COST);
        assert_eq!(model_cost("claude-3-haiku-20240307"), (0.25, 1.25));
    }
}

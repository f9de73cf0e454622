//! Hardcoded pipeline defaults, frozen into `PipelineState.config_snapshot`
//! when a run is created. A paused run resumes under the snapshot it was
//! created with, not under whatever the defaults are by then.

use serde::{Deserialize, Serialize};

/// Circuit breakers, model selection and timeouts for one run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineDefaults {
    pub max_verification_loops: u32,
    pub max_review_dev_loops: u32,
    pub max_tdd_iterations: u32,
    pub max_cost_usd: f64,
    pub default_model: String,
    /// When set, agents run a read-only Explore phase under this model first.
    #[serde(default)]
    pub explore_model: Option<String>,
    /// When set, a tool-less Plan call runs between Explore and Act.
    #[serde(default)]
    pub plan_model: Option<String>,
    /// Ordered provider names tried on failover.
    pub provider_chain: Vec<String>,
    pub delivery_strategy: String,
    /// Seconds. Test runs are killed past this bound.
    pub test_timeout: u64,
    pub agent_timeout: u64,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            max_verification_loops: 3,
            max_review_dev_loops: 3,
            max_tdd_iterations: 5,
            max_cost_usd: 10.0,
            default_model: "claude-3-5-sonnet-20240620".to_string(),
            explore_model: None,
            plan_model: None,
            provider_chain: vec!["anthropic".to_string(), "gemini".to_string()],
            delivery_strategy: "self_contained".to_string(),
            test_timeout: 120,
            agent_timeout: 300,
        }
    }
}

/// Per-repo fallbacks applied when the submission omits a field.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RepoDefaults {
    pub default_branch: String,
    pub test_command: String,
    pub language: String,
}

impl Default for RepoDefaults {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            test_command: "pytest".to_string(),
            language: "python".to_string(),
        }
    }
}

/// Frozen snapshot of all configuration for a CR run.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSnapshot {
    pub pipeline: PipelineDefaults,
    pub repo: RepoDefaults,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = ConfigSnapshot::default();
        let json = serde_json::to_string(&snap).unwrap();
        let back: ConfigSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.pipeline.max_tdd_iterations, 5);
        assert_eq!(back.repo.default_branch, "main");
    }
}

//! Conditional edge functions and the resume-override node mapping.

use crate::state::PipelineState;

/// Node ids in pipeline order. Used to pick the latest producing node when
/// resume overrides touch several fields.
pub const PIPELINE_ORDER: &[&str] = &[
    "intake",
    "repo_id",
    "worktree_setup",
    "translation",
    "verification",
    "tdd",
    "review",
    "rebase",
    "delivery",
    "release_gate",
    "release",
    "retrospective",
];

/// Route after behaviour verification: proceed, loop back, or trip the
/// circuit breaker.
pub fn after_verification(state: &PipelineState) -> String {
    if state.behaviour_verified {
        return "tdd".to_string();
    }
    let max_loops = state.config_snapshot.pipeline.max_verification_loops;
    if state.verification_loop_count >= max_loops {
        return "paused".to_string();
    }
    "translation".to_string()
}

/// Route after review: proceed, loop back to TDD, or trip the circuit
/// breaker.
pub fn after_review(state: &PipelineState) -> String {
    if state.review_passed {
        return "rebase".to_string();
    }
    let max_loops = state.config_snapshot.pipeline.max_review_dev_loops;
    if state.review_loop_count >= max_loops {
        return "paused".to_string();
    }
    "tdd".to_string()
}

/// Route after rebase: clean proceeds, unresolved conflicts pause.
pub fn after_rebase(state: &PipelineState) -> String {
    if state.rebase_clean {
        "delivery".to_string()
    } else {
        "paused".to_string()
    }
}

fn producing_node(key: &str) -> Option<&'static str> {
    match key {
        "behaviour_verified" => Some("verification"),
        "review_passed" => Some("review"),
        "rebase_clean" => Some("rebase"),
        _ => None,
    }
}

/// Maps resume-override keys to the node the engine should pretend produced
/// them: the latest producing node in pipeline order wins. Overrides with
/// only unknown keys resume from the paused terminal.
pub fn resume_node_for_overrides<'a>(keys: impl Iterator<Item = &'a str>) -> Option<&'static str> {
    keys.filter_map(producing_node)
        .max_by_key(|node| PIPELINE_ORDER.iter().position(|n| n == node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PipelineState;

    fn state() -> PipelineState {
        PipelineState::new("CR-1", "api")
    }

    /// **Scenario**: verification routes forward once verified, loops while
    /// under budget, pauses at the breaker.
    #[test]
    fn verification_routing() {
        let mut s = state();
        s.behaviour_verified = true;
        assert_eq!(after_verification(&s), "tdd");

        s.behaviour_verified = false;
        s.verification_loop_count = 1;
        assert_eq!(after_verification(&s), "translation");

        s.verification_loop_count = 3;
        assert_eq!(after_verification(&s), "paused");
    }

    #[test]
    fn review_routing() {
        let mut s = state();
        s.review_passed = true;
        assert_eq!(after_review(&s), "rebase");

        s.review_passed = false;
        s.review_loop_count = 2;
        assert_eq!(after_review(&s), "tdd");

        s.review_loop_count = 3;
        assert_eq!(after_review(&s), "paused");
    }

    #[test]
    fn rebase_routing() {
        let mut s = state();
        s.rebase_clean = true;
        assert_eq!(after_rebase(&s), "delivery");
        s.rebase_clean = false;
        assert_eq!(after_rebase(&s), "paused");
    }

    /// **Scenario**: the latest producing node in pipeline order wins.
    #[test]
    fn override_mapping_picks_latest_node() {
        assert_eq!(
            resume_node_for_overrides(["review_passed"].into_iter()),
            Some("review")
        );
        assert_eq!(
            resume_node_for_overrides(["behaviour_verified", "rebase_clean"].into_iter()),
            Some("rebase")
        );
        assert_eq!(resume_node_for_overrides(["mystery"].into_iter()), None);
    }
}

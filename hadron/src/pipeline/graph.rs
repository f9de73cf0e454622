//! The fixed pipeline graph: twelve stage nodes, a paused terminal, and
//! the three conditional routes (verification, review, rebase).

use std::collections::HashMap;
use std::sync::Arc;

use crate::graph::{CompilationError, CompiledStateGraph, StateGraph, END, START};
use crate::memory::Checkpointer;
use crate::state::PipelineState;

use super::edges::{after_rebase, after_review, after_verification};
use super::nodes::{
    BehaviourTranslationNode, BehaviourVerificationNode, DeliveryNode, IntakeNode, NodeContext,
    PausedNode, RebaseNode, ReleaseGateNode, ReleaseNode, RepoIdNode, RetrospectiveNode,
    ReviewNode, TddNode, WorktreeSetupNode,
};

/// Builds and compiles the pipeline graph:
///
/// ```text
/// intake → repo_id → worktree_setup → translation → verification
///   verification: verified → tdd | retry → translation | breaker → paused
/// tdd → review
///   review: passed → rebase | retry → tdd | breaker → paused
///   rebase: clean → delivery | conflicts → paused
/// delivery → release_gate → release → retrospective → END;  paused → END
/// ```
pub fn build_pipeline_graph(
    ctx: Arc<NodeContext>,
    checkpointer: Option<Arc<dyn Checkpointer<PipelineState>>>,
) -> Result<CompiledStateGraph<PipelineState>, CompilationError> {
    let mut graph = StateGraph::<PipelineState>::new();

    graph.add_node("intake", Arc::new(IntakeNode::new(ctx.clone())));
    graph.add_node("repo_id", Arc::new(RepoIdNode::new(ctx.clone())));
    graph.add_node("worktree_setup", Arc::new(WorktreeSetupNode::new(ctx.clone())));
    graph.add_node("translation", Arc::new(BehaviourTranslationNode::new(ctx.clone())));
    graph.add_node("verification", Arc::new(BehaviourVerificationNode::new(ctx.clone())));
    graph.add_node("tdd", Arc::new(TddNode::new(ctx.clone())));
    graph.add_node("review", Arc::new(ReviewNode::new(ctx.clone())));
    graph.add_node("rebase", Arc::new(RebaseNode::new(ctx.clone())));
    graph.add_node("delivery", Arc::new(DeliveryNode::new(ctx.clone())));
    graph.add_node("release_gate", Arc::new(ReleaseGateNode::new(ctx.clone())));
    graph.add_node("release", Arc::new(ReleaseNode::new(ctx.clone())));
    graph.add_node("retrospective", Arc::new(RetrospectiveNode::new(ctx.clone())));
    graph.add_node("paused", Arc::new(PausedNode::new(ctx)));

    graph.add_edge(START, "intake");
    graph.add_edge("intake", "repo_id");
    graph.add_edge("repo_id", "worktree_setup");
    graph.add_edge("worktree_setup", "translation");
    graph.add_edge("translation", "verification");

    graph.add_conditional_edges(
        "verification",
        Arc::new(|state: &PipelineState| after_verification(state)),
        Some(path_map(&[
            ("translation", "translation"),
            ("tdd", "tdd"),
            ("paused", "paused"),
        ])),
    );

    graph.add_edge("tdd", "review");

    graph.add_conditional_edges(
        "review",
        Arc::new(|state: &PipelineState| after_review(state)),
        Some(path_map(&[
            ("tdd", "tdd"),
            ("rebase", "rebase"),
            ("paused", "paused"),
        ])),
    );

    graph.add_conditional_edges(
        "rebase",
        Arc::new(|state: &PipelineState| after_rebase(state)),
        Some(path_map(&[("delivery", "delivery"), ("paused", "paused")])),
    );

    graph.add_edge("delivery", "release_gate");
    graph.add_edge("release_gate", "release");
    graph.add_edge("release", "retrospective");
    graph.add_edge("retrospective", END);
    graph.add_edge("paused", END);

    match checkpointer {
        Some(checkpointer) => graph.compile_with_checkpointer(checkpointer),
        None => graph.compile(),
    }
}

fn path_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

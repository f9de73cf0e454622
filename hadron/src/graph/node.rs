//! Graph node trait: one step in a [`StateGraph`](super::StateGraph).
//!
//! A node receives the full state and returns a *partial update*; the
//! engine merges it through [`GraphState::apply`], which encodes each
//! field's reducer (overwrite vs accumulate).

use async_trait::async_trait;
use std::fmt::Debug;

use crate::error::HadronError;

/// State types that can flow through a graph.
///
/// `Update` is the partial-update type returned by nodes. `apply` is the
/// single place merge semantics live; nodes never merge state themselves.
pub trait GraphState: Clone + Send + Sync + Debug + 'static {
    type Update: Send + Debug + 'static;

    /// Merges a node's partial update into the state.
    fn apply(&mut self, update: Self::Update);
}

/// One step in a graph: state in, partial update out.
///
/// Routing is edge-driven: after the update is applied, the engine follows
/// the node's unconditional edge or evaluates its conditional router.
///
/// **Interaction**: registered via `StateGraph::add_node`; executed by
/// `CompiledStateGraph::invoke`.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Node id (e.g. `"intake"`). Must be unique within a graph.
    fn id(&self) -> &str;

    /// Runs the node against a snapshot of the current state.
    async fn run(&self, state: S) -> Result<S::Update, HadronError>;
}

//! Compile-time validation errors for [`StateGraph`](super::StateGraph).

use thiserror::Error;

/// Returned by `StateGraph::compile` when the declared graph is invalid.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// An edge references a node id that was never added.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A conditional path map targets a node id that was never added.
    #[error("conditional path map targets unknown node: {0}")]
    InvalidConditionalPathMap(String),

    /// No edge from START.
    #[error("graph has no entry edge from START")]
    MissingStart,

    /// No edge or conditional target reaches END.
    #[error("graph has no path to END")]
    MissingEnd,

    /// A node declares both an unconditional edge and conditional edges.
    #[error("node has both an edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),

    /// The edge set is structurally invalid (duplicate from, multiple entries).
    #[error("invalid edge structure: {0}")]
    InvalidChain(String),
}

//! State graph builder: nodes plus explicit edges (from → to) and optional
//! conditional edges.
//!
//! A node must have either one outgoing `add_edge` or
//! `add_conditional_edges`, not both. `compile` validates the declared
//! structure and produces an immutable [`CompiledStateGraph`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::graph::compile_error::CompilationError;
use crate::graph::compiled::CompiledStateGraph;
use crate::graph::conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
use crate::graph::node::{GraphState, Node};
use crate::memory::Checkpointer;

/// Sentinel for graph entry: use as `from_id` in `add_edge(START, first)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: use as `to_id` in `add_edge(last, END)`.
pub const END: &str = "__end__";

/// Mutable graph under construction. Generic over state type `S`.
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    /// Edges (from_id, to_id).
    edges: Vec<(String, String)>,
    /// Conditional edges: source node id → router.
    conditional_edges: HashMap<String, ConditionalRouter<S>>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: HashMap::new(),
        }
    }

    /// Adds a node; id must be unique. Replaces if same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an edge from `from_id` to `to_id`. Use [`START`] / [`END`] for
    /// graph entry and exit.
    pub fn add_edge(&mut self, from_id: impl Into<String>, to_id: impl Into<String>) -> &mut Self {
        self.edges.push((from_id.into(), to_id.into()));
        self
    }

    /// Adds conditional edges from `source`: after the source node runs,
    /// `path` is called with the updated state; its return value is used as
    /// the next node id, or looked up in `path_map` when provided.
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        path: ConditionalRouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional_edges
            .insert(source.into(), ConditionalRouter::new(path, path_map));
        self
    }

    /// Builds the executable graph without persistence.
    pub fn compile(self) -> Result<CompiledStateGraph<S>, CompilationError> {
        self.compile_internal(None)
    }

    /// Builds the executable graph with a checkpointer. The engine writes a
    /// checkpoint keyed by (thread id, node id) after every node.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Result<CompiledStateGraph<S>, CompilationError> {
        self.compile_internal(Some(checkpointer))
    }

    fn compile_internal(
        self,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Result<CompiledStateGraph<S>, CompilationError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(CompilationError::NodeNotFound(from.clone()));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(CompilationError::NodeNotFound(to.clone()));
            }
        }
        for (source, router) in &self.conditional_edges {
            if !self.nodes.contains_key(source) {
                return Err(CompilationError::NodeNotFound(source.clone()));
            }
            if let Some(ref path_map) = router.path_map {
                for target in path_map.values() {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(CompilationError::InvalidConditionalPathMap(target.clone()));
                    }
                }
            }
        }

        let start_edges: Vec<_> = self
            .edges
            .iter()
            .filter(|(f, _)| f == START)
            .map(|(_, t)| t.clone())
            .collect();
        let first = match start_edges.len() {
            0 => return Err(CompilationError::MissingStart),
            1 => start_edges.into_iter().next().expect("one entry"),
            _ => {
                return Err(CompilationError::InvalidChain(
                    "multiple edges from START".into(),
                ))
            }
        };

        let has_end = self.edges.iter().any(|(_, t)| t == END)
            || self.conditional_edges.values().any(|r| {
                r.path_map
                    .as_ref()
                    .map_or(true, |m| m.values().any(|v| v == END))
            });
        if !has_end {
            return Err(CompilationError::MissingEnd);
        }

        let non_start_edges: Vec<_> = self.edges.iter().filter(|(f, _)| f != START).collect();
        let edge_froms: HashSet<_> = non_start_edges.iter().map(|(f, _)| f.clone()).collect();
        if edge_froms.len() != non_start_edges.len() {
            return Err(CompilationError::InvalidChain(
                "duplicate outgoing edge".into(),
            ));
        }
        for source in self.conditional_edges.keys() {
            if edge_froms.contains(source) {
                return Err(CompilationError::NodeHasBothEdgeAndConditional(
                    source.clone(),
                ));
            }
        }

        let mut next_map: HashMap<String, NextEntry<S>> = non_start_edges
            .into_iter()
            .map(|(f, t)| (f.clone(), NextEntry::Unconditional(t.clone())))
            .collect();
        for (source, router) in self.conditional_edges {
            next_map.insert(source, NextEntry::Conditional(router));
        }

        Ok(CompiledStateGraph::new(
            self.nodes,
            first,
            next_map,
            checkpointer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::error::HadronError;

    #[derive(Clone, Debug, Default)]
    struct Counter {
        hits: Vec<String>,
    }

    impl GraphState for Counter {
        type Update = Vec<String>;
        fn apply(&mut self, update: Vec<String>) {
            self.hits.extend(update);
        }
    }

    struct Hit(&'static str);

    #[async_trait]
    impl Node<Counter> for Hit {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(&self, _state: Counter) -> Result<Vec<String>, HadronError> {
            Ok(vec![self.0.to_string()])
        }
    }

    /// **Scenario**: compile fails when an edge references an unknown node.
    #[test]
    fn compile_rejects_unknown_node() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Hit("a")));
        graph.add_edge(START, "a");
        graph.add_edge("a", "ghost");
        match graph.compile() {
            Err(CompilationError::NodeNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected NodeNotFound, got {:?}", other.err()),
        }
    }

    /// **Scenario**: compile fails when a node has both an edge and conditional edges.
    #[test]
    fn compile_rejects_edge_and_conditional_on_same_node() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Hit("a")));
        graph.add_node("b", Arc::new(Hit("b")));
        graph.add_edge(START, "a");
        graph.add_edge("a", "b");
        graph.add_edge("b", END);
        graph.add_conditional_edges("a", Arc::new(|_: &Counter| "b".to_string()), None);
        match graph.compile() {
            Err(CompilationError::NodeHasBothEdgeAndConditional(id)) => assert_eq!(id, "a"),
            other => panic!("expected conflict error, got {:?}", other.err()),
        }
    }

    /// **Scenario**: compile fails when a conditional path map targets a missing node.
    #[test]
    fn compile_rejects_bad_path_map_target() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Hit("a")));
        graph.add_edge(START, "a");
        graph.add_conditional_edges(
            "a",
            Arc::new(|_: &Counter| "x".to_string()),
            Some(
                [("x".to_string(), "nonexistent".to_string())]
                    .into_iter()
                    .collect(),
            ),
        );
        match graph.compile() {
            Err(CompilationError::InvalidConditionalPathMap(id)) => assert_eq!(id, "nonexistent"),
            other => panic!("expected path map error, got {:?}", other.err()),
        }
    }

    /// **Scenario**: a graph with no entry edge is rejected.
    #[test]
    fn compile_requires_start() {
        let mut graph = StateGraph::<Counter>::new();
        graph.add_node("a", Arc::new(Hit("a")));
        graph.add_edge("a", END);
        assert!(matches!(
            graph.compile(),
            Err(CompilationError::MissingStart)
        ));
    }
}

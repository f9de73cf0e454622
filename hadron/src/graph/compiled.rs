//! Compiled state graph: immutable, supports invoke with optional
//! checkpointing and resume.
//!
//! The run loop executes one node at a time, merges its partial update via
//! [`GraphState::apply`], writes a checkpoint keyed by (thread id, node id),
//! then resolves the next node from the edge table. A crashed worker
//! therefore resumes from the last fully-executed node.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::HadronError;
use crate::graph::conditional::NextEntry;
use crate::graph::node::{GraphState, Node};
use crate::graph::state_graph::END;
use crate::memory::Checkpointer;

/// Where to start execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumePoint {
    /// Run the named node first (it re-executes).
    AtNode(String),
    /// Skip the named node and continue from its outgoing edges, as if it
    /// had just produced the current state. Used for resume-with-overrides.
    AfterNode(String),
}

/// Per-invoke configuration.
#[derive(Clone, Debug, Default)]
pub struct GraphRunConfig {
    /// Checkpoint key; checkpointing is skipped when unset.
    pub thread_id: Option<String>,
    pub resume: Option<ResumePoint>,
}

impl GraphRunConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            resume: None,
        }
    }

    pub fn resuming(mut self, resume: ResumePoint) -> Self {
        self.resume = Some(resume);
        self
    }
}

/// Immutable executable graph produced by `StateGraph::compile`.
pub struct CompiledStateGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    first_node_id: String,
    next_map: HashMap<String, NextEntry<S>>,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S: GraphState> CompiledStateGraph<S> {
    pub(super) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        first_node_id: String,
        next_map: HashMap<String, NextEntry<S>>,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Self {
        Self {
            nodes,
            first_node_id,
            next_map,
            checkpointer,
        }
    }

    /// Resolves the node to run after `node_id`, given the current state.
    /// `None` means the graph is done.
    fn next_after(&self, node_id: &str, state: &S) -> Option<String> {
        match self.next_map.get(node_id)? {
            NextEntry::Unconditional(to) => {
                if to == END {
                    None
                } else {
                    Some(to.clone())
                }
            }
            NextEntry::Conditional(router) => {
                let target = router.resolve_next(state);
                debug!(from = node_id, to = %target, "conditional routing");
                if target == END {
                    None
                } else {
                    Some(target)
                }
            }
        }
    }

    /// Runs the graph to END (or to the resume point's natural end) and
    /// returns the final state.
    ///
    /// With a checkpointer and `config.thread_id`, the full post-node state
    /// is persisted after every node; a node that fails leaves no
    /// checkpoint, so its whole execution is re-run on resume.
    pub async fn invoke(&self, state: S, config: GraphRunConfig) -> Result<S, HadronError> {
        if !self.nodes.contains_key(&self.first_node_id) {
            return Err(HadronError::Execution("empty graph".into()));
        }
        let mut state = state;

        let mut current = match &config.resume {
            None => Some(self.first_node_id.clone()),
            Some(ResumePoint::AtNode(id)) => {
                if self.nodes.contains_key(id) {
                    Some(id.clone())
                } else {
                    return Err(HadronError::Execution(format!(
                        "cannot resume at unknown node: {id}"
                    )));
                }
            }
            Some(ResumePoint::AfterNode(id)) => self.next_after(id, &state),
        };

        while let Some(node_id) = current {
            let node = self
                .nodes
                .get(&node_id)
                .ok_or_else(|| HadronError::Execution(format!("unknown node: {node_id}")))?
                .clone();

            debug!(node = %node_id, "node start");
            let update = node.run(state.clone()).await?;
            state.apply(update);

            if let (Some(cp), Some(thread_id)) = (&self.checkpointer, config.thread_id.as_deref())
            {
                cp.put(thread_id, &node_id, &state).await?;
            }
            debug!(node = %node_id, "node complete");

            current = self.next_after(&node_id, &state);
        }
        Ok(state)
    }
}

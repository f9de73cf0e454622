//! State-graph runtime: nodes, explicit and conditional edges, per-node
//! checkpointing, and resume.
//!
//! Build with [`StateGraph::add_node`] / [`StateGraph::add_edge`] using
//! [`START`] and [`END`] sentinels, route with
//! [`StateGraph::add_conditional_edges`], then `compile()` (optionally with
//! a checkpointer) to get a [`CompiledStateGraph`].

mod compile_error;
mod compiled;
mod conditional;
mod node;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledStateGraph, GraphRunConfig, ResumePoint};
pub use conditional::{ConditionalRouter, ConditionalRouterFn, NextEntry};
pub use node::{GraphState, Node};
pub use state_graph::{StateGraph, END, START};

//! Checkpoint persistence: saves the full post-node state keyed by
//! (thread id, node id) so a crashed or paused worker can resume from the
//! last fully-executed node.
//!
//! Implementations: [`MemorySaver`] (tests) and [`PgCheckpointSaver`]
//! (Postgres via sqlx). Checkpoint payloads are opaque JSON, versioned by
//! [`CHECKPOINT_VERSION`]; a version bump invalidates outstanding paused
//! runs, which must then be resubmitted.

mod memory_saver;
mod postgres;

pub use memory_saver::MemorySaver;
pub use postgres::PgCheckpointSaver;

use async_trait::async_trait;
use thiserror::Error;

/// Version stamped into every checkpoint row. Bump when the pipeline state
/// record changes incompatibly.
pub const CHECKPOINT_VERSION: i32 = 1;

/// Error type for checkpoint operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("unsupported checkpoint version: {0}")]
    Version(i32),
}

/// The latest checkpoint for a thread.
#[derive(Clone, Debug)]
pub struct CheckpointTuple<S> {
    /// Node after which this checkpoint was written.
    pub node_id: String,
    pub state: S,
    /// Monotonically increasing step within the thread.
    pub step: i64,
}

/// Listing entry (no payload).
#[derive(Clone, Debug)]
pub struct CheckpointListItem {
    pub node_id: String,
    pub step: i64,
}

/// Saves and loads checkpoints by thread id.
///
/// **Interaction**: injected at compile via
/// `StateGraph::compile_with_checkpointer`; the run loop calls `put` after
/// every node; the worker driver calls `latest` on startup to decide
/// whether to resume.
#[async_trait]
pub trait Checkpointer<S>: Send + Sync
where
    S: Clone + Send + Sync + 'static,
{
    /// Persist a checkpoint for the thread. Steps increase monotonically.
    async fn put(&self, thread_id: &str, node_id: &str, state: &S) -> Result<(), CheckpointError>;

    /// Load the most recent checkpoint for the thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple<S>>, CheckpointError>;

    /// List checkpoints for the thread, newest first.
    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError>;
}

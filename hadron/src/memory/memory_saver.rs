//! In-memory checkpointer for tests and single-process runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CheckpointError, CheckpointListItem, CheckpointTuple, Checkpointer};

/// Keeps checkpoints in a process-local map. Cloning the saver is not
/// supported; share it behind `Arc`.
pub struct MemorySaver<S> {
    threads: Mutex<HashMap<String, Vec<CheckpointTuple<S>>>>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Default for MemorySaver<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> Checkpointer<S> for MemorySaver<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn put(&self, thread_id: &str, node_id: &str, state: &S) -> Result<(), CheckpointError> {
        let mut guard = self
            .threads
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let entries = guard.entry(thread_id.to_string()).or_default();
        let step = entries.last().map(|t| t.step + 1).unwrap_or(0);
        entries.push(CheckpointTuple {
            node_id: node_id.to_string(),
            state: state.clone(),
            step,
        });
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let guard = self
            .threads
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(guard.get(thread_id).and_then(|v| v.last().cloned()))
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let guard = self
            .threads
            .lock()
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let mut items: Vec<_> = guard
            .get(thread_id)
            .map(|v| {
                v.iter()
                    .map(|t| CheckpointListItem {
                        node_id: t.node_id.clone(),
                        step: t.step,
                    })
                    .collect()
            })
            .unwrap_or_default();
        items.reverse();
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: steps increase monotonically and latest returns the newest entry.
    #[tokio::test]
    async fn steps_increase_and_latest_wins() {
        let saver = MemorySaver::<u32>::new();
        saver.put("t", "a", &1).await.unwrap();
        saver.put("t", "b", &2).await.unwrap();
        let latest = saver.latest("t").await.unwrap().unwrap();
        assert_eq!(latest.node_id, "b");
        assert_eq!(latest.state, 2);
        assert_eq!(latest.step, 1);

        let items = saver.list("t", None).await.unwrap();
        assert_eq!(items[0].node_id, "b");
        assert_eq!(items[1].node_id, "a");
    }

    #[tokio::test]
    async fn missing_thread_is_none() {
        let saver = MemorySaver::<u32>::new();
        assert!(saver.latest("none").await.unwrap().is_none());
        assert!(saver.list("none", Some(5)).await.unwrap().is_empty());
    }
}

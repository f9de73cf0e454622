//! Event bus: durable per-CR streams with gap-free replay.
//!
//! The replay/subscribe contract is the critical piece: `replay` returns a
//! concrete cursor (the id of the last event seen, or `"0"` for an empty
//! stream) and `subscribe` starts strictly *after* that cursor. A consumer
//! that replays and then subscribes with the returned cursor observes the
//! whole stream with no duplicates and no gaps, regardless of what is
//! emitted in between. A "only future entries" cursor is deliberately not
//! offered.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::event::PipelineEvent;
use crate::kvs::{Kvs, KvsError, StreamId};

use super::keys;

/// Cursor value for "from the beginning" (also what `replay` returns for an
/// empty stream).
pub const REPLAY_START: &str = "0";

/// Block window for one subscription read. Bounded so a cancelled consumer
/// is observed within this interval.
const SUBSCRIBE_BLOCK: Duration = Duration::from_secs(5);
const SUBSCRIBE_BATCH: usize = 50;

/// Durable per-CR event stream over any [`Kvs`].
#[derive(Clone)]
pub struct EventBus {
    kvs: Arc<dyn Kvs>,
}

impl EventBus {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Appends an event to its CR's stream and publishes a wake-up hint.
    pub async fn emit(&self, event: &PipelineEvent) -> Result<(), KvsError> {
        let key = keys::stream(&event.cr_id);
        let payload = serde_json::to_string(event).map_err(|e| KvsError::Decode(e.to_string()))?;
        let id = self.kvs.append(&key, &payload).await?;
        debug!(cr_id = %event.cr_id, event = event.event_type.as_str(), %id, "event emitted");
        self.kvs.publish(&keys::notify(&event.cr_id), "1").await?;
        Ok(())
    }

    /// Returns all events from `from_id` (inclusive) and the cursor to pass
    /// verbatim to [`EventBus::subscribe`]. An empty stream yields
    /// `(vec![], "0")`.
    pub async fn replay(
        &self,
        cr_id: &str,
        from_id: &str,
    ) -> Result<(Vec<PipelineEvent>, String), KvsError> {
        let from: StreamId = from_id.parse()?;
        let entries = self.kvs.range_from(&keys::stream(cr_id), from).await?;
        let mut last_id = REPLAY_START.to_string();
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            last_id = entry.id.to_string();
            events.push(
                serde_json::from_str(&entry.payload).map_err(|e| KvsError::Decode(e.to_string()))?,
            );
        }
        Ok((events, last_id))
    }

    /// Opens a subscription starting strictly after `last_id` (a cursor
    /// previously returned by [`EventBus::replay`]).
    pub fn subscribe(&self, cr_id: &str, last_id: &str) -> Result<EventSubscription, KvsError> {
        Ok(EventSubscription {
            kvs: self.kvs.clone(),
            key: keys::stream(cr_id),
            cursor: last_id.parse()?,
            block: SUBSCRIBE_BLOCK,
        })
    }
}

/// Lazy unbounded sequence of events. Each `next_batch` blocks at most the
/// subscribe window and returns an empty batch on timeout so the caller can
/// check for cancellation between windows.
pub struct EventSubscription {
    kvs: Arc<dyn Kvs>,
    key: String,
    cursor: StreamId,
    block: Duration,
}

impl EventSubscription {
    /// Shrinks the block window. Intended for tests that poll an idle stream.
    pub fn with_block_window(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    pub async fn next_batch(&mut self) -> Result<Vec<PipelineEvent>, KvsError> {
        let entries = self
            .kvs
            .read_after(&self.key, self.cursor, self.block, SUBSCRIBE_BATCH)
            .await?;
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            self.cursor = entry.id;
            events.push(
                serde_json::from_str(&entry.payload).map_err(|e| KvsError::Decode(e.to_string()))?,
            );
        }
        Ok(events)
    }
}

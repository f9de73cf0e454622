//! Key-value store with streams: the substrate under the event bus,
//! intervention manager, resume overrides, and conversation storage.
//!
//! Stream ids are server-assigned and monotonically increasing per stream
//! (`ms-seq`, Redis style). `range_from` is inclusive; `read_after` is
//! exclusive and blocks in bounded windows, returning an empty batch on
//! timeout so callers can observe cancellation.
//!
//! Implementations: [`RedisKvs`] (production) and [`MemoryKvs`] (tests).

mod memory;
mod redis_kvs;

pub use memory::MemoryKvs;
pub use redis_kvs::RedisKvs;

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Error type for KVS operations.
#[derive(Debug, Error)]
pub enum KvsError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

/// Monotonic per-stream entry id, ordered by (ms, seq).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamId {
    /// The before-everything cursor. `range_from(ZERO)` scans a whole stream.
    pub const ZERO: StreamId = StreamId { ms: 0, seq: 0 };
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for StreamId {
    type Err = KvsError;

    /// Accepts `ms-seq` and the bare-`ms` shorthand (`"0"` → `0-0`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms
            .parse()
            .map_err(|_| KvsError::Decode(format!("bad stream id: {s}")))?;
        let seq = seq
            .parse()
            .map_err(|_| KvsError::Decode(format!("bad stream id: {s}")))?;
        Ok(StreamId { ms, seq })
    }
}

/// One stream entry: server-assigned id plus opaque payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub payload: String,
}

/// Key-value store with append-only streams.
///
/// **Interaction**: the event bus funnels all stream access through this
/// trait; interventions and resume overrides use the atomic `get_del`.
#[async_trait]
pub trait Kvs: Send + Sync {
    /// Appends to a stream, returning the assigned id. Ids are strictly
    /// increasing within one stream.
    async fn append(&self, stream: &str, payload: &str) -> Result<StreamId, KvsError>;

    /// Range-scan from `from` *inclusive* to the end of the stream.
    async fn range_from(&self, stream: &str, from: StreamId) -> Result<Vec<StreamEntry>, KvsError>;

    /// Blocking read of entries strictly *after* `after`. Waits at most
    /// `block`; a timeout returns an empty batch, not an error.
    async fn read_after(
        &self,
        stream: &str,
        after: StreamId,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, KvsError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), KvsError>;

    /// Set with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvsError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvsError>;

    /// Atomic get-and-delete; each stored value is observed at most once.
    async fn get_del(&self, key: &str) -> Result<Option<String>, KvsError>;

    /// Fire-and-forget wake-up hint on a side channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), KvsError>;

    /// Liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), KvsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_parses_both_forms() {
        assert_eq!("0".parse::<StreamId>().unwrap(), StreamId::ZERO);
        assert_eq!(
            "1700000000123-4".parse::<StreamId>().unwrap(),
            StreamId { ms: 1700000000123, seq: 4 }
        );
        assert!("nope".parse::<StreamId>().is_err());
        assert!("1-x".parse::<StreamId>().is_err());
    }

    /// **Scenario**: ids order numerically by (ms, seq), not lexically.
    #[test]
    fn stream_id_orders_numerically() {
        let a = StreamId { ms: 9, seq: 0 };
        let b = StreamId { ms: 10, seq: 0 };
        let c = StreamId { ms: 10, seq: 3 };
        assert!(a < b);
        assert!(b < c);
        assert_eq!(b.to_string(), "10-0");
    }
}

//! In-memory KVS for tests and single-process runs.
//!
//! Blocking stream reads use a per-stream `tokio::sync::watch` version
//! counter: the receiver is subscribed while the data lock is held, so an
//! append between releasing the lock and awaiting the change cannot be
//! missed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use super::{Kvs, KvsError, StreamEntry, StreamId};

struct StreamData {
    entries: Vec<StreamEntry>,
    version_tx: watch::Sender<u64>,
}

impl StreamData {
    fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            entries: Vec::new(),
            version_tx,
        }
    }
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamData>,
    kv: HashMap<String, KvEntry>,
}

impl Default for StreamData {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-local KVS. Share behind `Arc<dyn Kvs>`.
pub struct MemoryKvs {
    inner: Mutex<Inner>,
}

impl MemoryKvs {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, KvsError> {
        self.inner
            .lock()
            .map_err(|e| KvsError::Transport(e.to_string()))
    }
}

impl Default for MemoryKvs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Kvs for MemoryKvs {
    async fn append(&self, stream: &str, payload: &str) -> Result<StreamId, KvsError> {
        let mut guard = self.lock()?;
        let data = guard.streams.entry(stream.to_string()).or_default();
        let now_ms = chrono::Utc::now().timestamp_millis() as u64;
        let id = match data.entries.last() {
            Some(last) if last.id.ms >= now_ms => StreamId {
                ms: last.id.ms,
                seq: last.id.seq + 1,
            },
            _ => StreamId { ms: now_ms, seq: 0 },
        };
        data.entries.push(StreamEntry {
            id,
            payload: payload.to_string(),
        });
        let _ = data.version_tx.send_modify(|v| *v += 1);
        Ok(id)
    }

    async fn range_from(&self, stream: &str, from: StreamId) -> Result<Vec<StreamEntry>, KvsError> {
        let guard = self.lock()?;
        Ok(guard
            .streams
            .get(stream)
            .map(|d| {
                d.entries
                    .iter()
                    .filter(|e| e.id >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_after(
        &self,
        stream: &str,
        after: StreamId,
        block: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, KvsError> {
        let deadline = Instant::now() + block;
        loop {
            let mut version_rx = {
                let mut guard = self.lock()?;
                let data = guard.streams.entry(stream.to_string()).or_default();
                let batch: Vec<StreamEntry> = data
                    .entries
                    .iter()
                    .filter(|e| e.id > after)
                    .take(count)
                    .cloned()
                    .collect();
                if !batch.is_empty() {
                    return Ok(batch);
                }
                data.version_tx.subscribe()
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            match tokio::time::timeout(remaining, version_rx.changed()).await {
                Ok(_) => continue,
                Err(_) => return Ok(Vec::new()),
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvsError> {
        let mut guard = self.lock()?;
        guard.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvsError> {
        let mut guard = self.lock()?;
        guard.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut guard = self.lock()?;
        if guard.kv.get(key).map(KvEntry::is_expired).unwrap_or(false) {
            guard.kv.remove(key);
        }
        Ok(guard.kv.get(key).map(|e| e.value.clone()))
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, KvsError> {
        let mut guard = self.lock()?;
        let entry = guard.kv.remove(key);
        Ok(entry.filter(|e| !e.is_expired()).map(|e| e.value))
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), KvsError> {
        // Pub/sub is only a wake-up hint; blocking reads use the watch channel.
        Ok(())
    }

    async fn ping(&self) -> Result<(), KvsError> {
        Ok(())
    }
}

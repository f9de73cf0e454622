//! CR-run relational store: one row per Change Request pipeline run.
//!
//! Rows are created on intake and mutated only by the Controller (resume)
//! and the Worker (status transitions); never deleted.

mod memory;
mod postgres;

pub use memory::MemoryRunStore;
pub use postgres::PgRunStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::state::RunStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("database: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// One pipeline run.
#[derive(Clone, Debug)]
pub struct CrRunRecord {
    pub cr_id: String,
    pub status: RunStatus,
    pub external_id: Option<String>,
    pub source: String,
    /// Raw submission payload, as received.
    pub raw_cr: Option<Value>,
    /// Config snapshot frozen at trigger time.
    pub config_snapshot: Option<Value>,
    pub cost_usd: f64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrRunRecord {
    /// Fresh pending record for a new submission.
    pub fn pending(
        cr_id: impl Into<String>,
        source: impl Into<String>,
        external_id: Option<String>,
        raw_cr: Value,
        config_snapshot: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            cr_id: cr_id.into(),
            status: RunStatus::Pending,
            external_id,
            source: source.into(),
            raw_cr: Some(raw_cr),
            config_snapshot: Some(config_snapshot),
            cost_usd: 0.0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title pulled out of the raw submission, for list endpoints.
    pub fn title(&self) -> String {
        self.raw_cr
            .as_ref()
            .and_then(|raw| raw.get("title"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Persistence for CR runs.
#[async_trait]
pub trait CrRunStore: Send + Sync {
    async fn insert(&self, record: &CrRunRecord) -> Result<(), StoreError>;

    async fn get(&self, cr_id: &str) -> Result<Option<CrRunRecord>, StoreError>;

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CrRunRecord>, StoreError>;

    /// Newest-first listing, capped at `limit`.
    async fn list(&self, limit: usize) -> Result<Vec<CrRunRecord>, StoreError>;

    /// Status transition; clears or sets the error text alongside.
    async fn set_status(
        &self,
        cr_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Terminal update from the worker: status, accumulated cost, error.
    async fn finish(
        &self,
        cr_id: &str,
        status: RunStatus,
        cost_usd: f64,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Liveness probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}

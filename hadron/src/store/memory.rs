//! In-memory run store for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::state::RunStatus;

use super::{CrRunRecord, CrRunStore, StoreError};

#[derive(Default)]
pub struct MemoryRunStore {
    rows: Mutex<HashMap<String, CrRunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CrRunRecord>>, StoreError> {
        self.rows
            .lock()
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

#[async_trait]
impl CrRunStore for MemoryRunStore {
    async fn insert(&self, record: &CrRunRecord) -> Result<(), StoreError> {
        self.lock()?.insert(record.cr_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, cr_id: &str) -> Result<Option<CrRunRecord>, StoreError> {
        Ok(self.lock()?.get(cr_id).cloned())
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CrRunRecord>, StoreError> {
        Ok(self
            .lock()?
            .values()
            .find(|r| r.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<CrRunRecord>, StoreError> {
        let mut rows: Vec<_> = self.lock()?.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn set_status(
        &self,
        cr_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let row = guard
            .get_mut(cr_id)
            .ok_or_else(|| StoreError::NotFound(cr_id.to_string()))?;
        row.status = status;
        row.error = error.map(str::to_string);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn finish(
        &self,
        cr_id: &str,
        status: RunStatus,
        cost_usd: f64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        let row = guard
            .get_mut(cr_id)
            .ok_or_else(|| StoreError::NotFound(cr_id.to_string()))?;
        row.status = status;
        row.cost_usd = cost_usd;
        row.error = error.map(str::to_string);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(cr_id: &str, external_id: Option<&str>) -> CrRunRecord {
        CrRunRecord::pending(
            cr_id,
            "api",
            external_id.map(str::to_string),
            json!({"title": "Add endpoint"}),
            json!({}),
        )
    }

    #[tokio::test]
    async fn insert_get_and_lookup_by_external_id() {
        let store = MemoryRunStore::new();
        store.insert(&record("CR-1", Some("JIRA-7"))).await.unwrap();
        assert_eq!(store.get("CR-1").await.unwrap().unwrap().title(), "Add endpoint");
        assert!(store.get_by_external_id("JIRA-7").await.unwrap().is_some());
        assert!(store.get_by_external_id("JIRA-8").await.unwrap().is_none());
    }

    /// **Scenario**: finish records terminal status, cost and error together.
    #[tokio::test]
    async fn finish_updates_terminal_fields() {
        let store = MemoryRunStore::new();
        store.insert(&record("CR-1", None)).await.unwrap();
        store
            .finish("CR-1", RunStatus::Paused, 1.25, Some("verification circuit breaker"))
            .await
            .unwrap();
        let row = store.get("CR-1").await.unwrap().unwrap();
        assert_eq!(row.status, RunStatus::Paused);
        assert!((row.cost_usd - 1.25).abs() < 1e-9);
        assert!(row.error.as_deref().unwrap().contains("circuit breaker"));
    }
}

//! Postgres-backed run store (sqlx).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::state::RunStatus;

use super::{CrRunRecord, CrRunStore, StoreError};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cr_runs (
    cr_id           VARCHAR(64)  PRIMARY KEY,
    status          VARCHAR(32)  NOT NULL DEFAULT 'pending',
    external_id     VARCHAR(256) UNIQUE,
    source          VARCHAR(32)  NOT NULL DEFAULT 'api',
    raw_cr          JSONB,
    config_snapshot JSONB,
    cost_usd        DOUBLE PRECISION NOT NULL DEFAULT 0,
    error           TEXT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the cr_runs table if it does not exist.
    pub async fn setup(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<CrRunRecord, StoreError> {
        let status_text: String = row.try_get("status").map_err(StoreError::from)?;
        let status = RunStatus::parse(&status_text)
            .ok_or_else(|| StoreError::Database(format!("unknown status: {status_text}")))?;
        Ok(CrRunRecord {
            cr_id: row.try_get("cr_id")?,
            status,
            external_id: row.try_get("external_id")?,
            source: row.try_get("source")?,
            raw_cr: row.try_get("raw_cr")?,
            config_snapshot: row.try_get("config_snapshot")?,
            cost_usd: row.try_get("cost_usd")?,
            error: row.try_get("error")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl CrRunStore for PgRunStore {
    async fn insert(&self, record: &CrRunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO cr_runs
                (cr_id, status, external_id, source, raw_cr, config_snapshot, cost_usd, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.cr_id)
        .bind(record.status.as_str())
        .bind(&record.external_id)
        .bind(&record.source)
        .bind(&record.raw_cr)
        .bind(&record.config_snapshot)
        .bind(record.cost_usd)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, cr_id: &str) -> Result<Option<CrRunRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM cr_runs WHERE cr_id = $1")
            .bind(cr_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<CrRunRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM cr_runs WHERE external_id = $1")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<CrRunRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM cr_runs ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn set_status(
        &self,
        cr_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE cr_runs SET status = $2, error = $3, updated_at = now() WHERE cr_id = $1",
        )
        .bind(cr_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(cr_id.to_string()));
        }
        Ok(())
    }

    async fn finish(
        &self,
        cr_id: &str,
        status: RunStatus,
        cost_usd: f64,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE cr_runs
            SET status = $2, cost_usd = $3, error = $4, updated_at = now()
            WHERE cr_id = $1
            "#,
        )
        .bind(cr_id)
        .bind(status.as_str())
        .bind(cost_usd)
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(cr_id.to_string()));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

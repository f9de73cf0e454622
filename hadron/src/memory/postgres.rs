//! Postgres-backed checkpointer (sqlx). One row per (thread, step);
//! payloads are versioned JSON blobs of the full state.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::{CheckpointError, CheckpointListItem, CheckpointTuple, Checkpointer, CHECKPOINT_VERSION};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    thread_id  TEXT        NOT NULL,
    step       BIGINT      NOT NULL,
    node_id    TEXT        NOT NULL,
    version    INTEGER     NOT NULL,
    state      JSONB       NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (thread_id, step)
)
"#;

/// Durable checkpointer over a shared [`PgPool`].
pub struct PgCheckpointSaver<S> {
    pool: PgPool,
    _marker: std::marker::PhantomData<fn() -> S>,
}

impl<S> PgCheckpointSaver<S> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _marker: std::marker::PhantomData,
        }
    }

    /// Creates the checkpoint table if it does not exist.
    pub async fn setup(&self) -> Result<(), CheckpointError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl<S> Checkpointer<S> for PgCheckpointSaver<S>
where
    S: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    async fn put(&self, thread_id: &str, node_id: &str, state: &S) -> Result<(), CheckpointError> {
        let payload =
            serde_json::to_value(state).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, step, node_id, version, state)
            SELECT $1, COALESCE(MAX(step) + 1, 0), $2, $3, $4
            FROM checkpoints WHERE thread_id = $1
            "#,
        )
        .bind(thread_id)
        .bind(node_id)
        .bind(CHECKPOINT_VERSION)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let row = sqlx::query(
            r#"
            SELECT node_id, step, version, state
            FROM checkpoints
            WHERE thread_id = $1
            ORDER BY step DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i32 = row
            .try_get("version")
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version(version));
        }
        let node_id: String = row
            .try_get("node_id")
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let step: i64 = row
            .try_get("step")
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let state: serde_json::Value = row
            .try_get("state")
            .map_err(|e| CheckpointError::Storage(e.to_string()))?;
        let state =
            serde_json::from_value(state).map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(Some(CheckpointTuple {
            node_id,
            state,
            step,
        }))
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointListItem>, CheckpointError> {
        let limit = limit.unwrap_or(100) as i64;
        let rows = sqlx::query(
            r#"
            SELECT node_id, step FROM checkpoints
            WHERE thread_id = $1
            ORDER BY step DESC
            LIMIT $2
            "#,
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CheckpointError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(CheckpointListItem {
                    node_id: row
                        .try_get("node_id")
                        .map_err(|e| CheckpointError::Storage(e.to_string()))?,
                    step: row
                        .try_get("step")
                        .map_err(|e| CheckpointError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }
}

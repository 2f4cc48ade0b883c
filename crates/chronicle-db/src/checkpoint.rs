//! Run checkpoint persisted in the `system_config` table.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};
use tracing::{debug, warn};

use chronicle_core::{Checkpoint, CheckpointStore, Error, Result};

const CONFIG_KEY_PREFIX: &str = "enrichment_checkpoint";

/// Checkpoint stored as one JSON row, replaced with a single upsert.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: Pool<Postgres>,
    key: String,
}

impl PgCheckpointStore {
    /// `scope` separates checkpoints of independent pipelines (e.g. one per
    /// entity kind).
    pub fn new(pool: Pool<Postgres>, scope: &str) -> Self {
        Self {
            pool,
            key: format!("{}:{}", CONFIG_KEY_PREFIX, scope),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| Error::Internal(format!("Failed to serialize checkpoint: {e}")))?;

        sqlx::query(
            "INSERT INTO system_config (key, value, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(&self.key)
        .bind(&value)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            key = %self.key,
            offset = checkpoint.last_completed_offset,
            "Checkpoint persisted to database"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        let persisted: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT value FROM system_config WHERE key = $1")
                .bind(&self.key)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        let Some((value,)) = persisted else {
            return Ok(None);
        };
        match serde_json::from_value::<Checkpoint>(value) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Stored checkpoint is unreadable, ignoring");
                Ok(None)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM system_config WHERE key = $1")
            .bind(&self.key)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

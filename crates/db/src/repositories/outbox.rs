use chrono::{DateTime, Utc};

use super::codec::{encode_timestamp, insert_outbox_entries, outbox_from_row};
use super::{OutboxEntry, OutboxRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn enqueue(&self, entries: Vec<OutboxEntry>) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let written = insert_outbox_entries(&mut *tx, &entries).await?;
        tx.commit().await?;
        Ok(written)
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                solicitud_id,
                kind,
                payload_json,
                attempts,
                last_error,
                created_at,
                dispatched_at
             FROM notification_outbox
             WHERE dispatched_at IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(outbox_from_row).collect()
    }

    async fn mark_dispatched(
        &self,
        id: &str,
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notification_outbox
             SET dispatched_at = ?, last_error = NULL
             WHERE id = ?",
        )
        .bind(encode_timestamp(dispatched_at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("outbox entry `{id}`")));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE notification_outbox
             SET attempts = attempts + 1, last_error = ?
             WHERE id = ? AND dispatched_at IS NULL",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("pending outbox entry `{id}`")));
        }
        Ok(())
    }
}

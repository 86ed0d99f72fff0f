use sqlx::Row;

use super::codec::{encode_json, encode_timestamp, parse_json, parse_timestamp};
use super::{ConfigEntry, ConfigStore, RepositoryError};
use crate::DbPool;

/// Key → JSON tunables read at startup and overlaid on the file config.
pub struct SqlConfigStore {
    pool: DbPool,
}

impl SqlConfigStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConfigStore for SqlConfigStore {
    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT key, value_json, updated_at
             FROM engine_config_entry
             ORDER BY key ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let value_json = row.try_get::<String, _>("value_json")?;
                Ok(ConfigEntry {
                    key: row.try_get("key")?,
                    value: parse_json("value_json", &value_json)?,
                    updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
                })
            })
            .collect()
    }

    async fn put(&self, entry: ConfigEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO engine_config_entry (key, value_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
        )
        .bind(&entry.key)
        .bind(encode_json("value_json", &entry.value)?)
        .bind(encode_timestamp(entry.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

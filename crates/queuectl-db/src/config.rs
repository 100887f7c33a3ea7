//! Queue configuration repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::info;

use queuectl_core::{ConfigRepository, ConfigValue, QueueConfig, Result};

/// SQLite implementation of ConfigRepository.
///
/// Values are stored as JSON text so numbers come back as numbers.
#[derive(Clone)]
pub struct SqliteConfigRepository {
    pool: SqlitePool,
}

impl SqliteConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode_value(raw: &str) -> ConfigValue {
        // Hand-edited rows may hold bare text rather than JSON.
        serde_json::from_str(raw).unwrap_or_else(|_| ConfigValue::parse(raw))
    }
}

#[async_trait]
impl ConfigRepository for SqliteConfigRepository {
    async fn entries(&self) -> Result<BTreeMap<String, ConfigValue>> {
        let rows = sqlx::query("SELECT key, value FROM queue_config ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<(String, ConfigValue)> {
                let key: String = row.try_get("key")?;
                let raw: String = row.try_get("value")?;
                Ok((key, Self::decode_value(&raw)))
            })
            .collect()
    }

    async fn set(&self, key: &str, value: &ConfigValue) -> Result<()> {
        QueueConfig::validate_entry(key, value)?;
        let encoded = serde_json::to_string(value)?;

        sqlx::query(
            "INSERT INTO queue_config (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(&encoded)
        .execute(&self.pool)
        .await?;

        info!(
            subsystem = "config",
            component = "repository",
            op = "set",
            key,
            value = %value,
            "Config updated"
        );
        Ok(())
    }
}

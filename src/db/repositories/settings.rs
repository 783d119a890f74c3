use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::db::{helpers::format_timestamp, Database};

impl Database {
    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|value| {
                serde_json::from_str(&value)
                    .with_context(|| format!("setting {key} is not valid JSON"))
            })
            .transpose()
        })
        .await
    }

    pub async fn set_setting(&self, key: &str, value: &Value) -> Result<()> {
        let key = key.to_string();
        let serialized = serde_json::to_string(value)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, serialized, format_timestamp(&Utc::now())],
            )
            .with_context(|| format!("failed to write setting {key}"))?;
            Ok(())
        })
        .await
    }

    /// Every stored setting. Rows holding invalid JSON are skipped.
    pub async fn all_settings(&self) -> Result<BTreeMap<String, Value>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY key")?;
            let mut rows = stmt.query([])?;
            let mut settings = BTreeMap::new();
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let raw: String = row.get(1)?;
                match serde_json::from_str(&raw) {
                    Ok(value) => {
                        settings.insert(key, value);
                    }
                    Err(err) => log::warn!("Skipping unreadable setting {key}: {err}"),
                }
            }
            Ok(settings)
        })
        .await
    }
}

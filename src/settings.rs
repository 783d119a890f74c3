use std::{collections::BTreeMap, sync::RwLock};

use anyhow::{bail, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::Database;

/// Time limits in minutes. Unset limits are never checked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Limits {
    pub daily_total_mins: Option<u64>,
    pub categories: BTreeMap<String, u64>,
    pub domains: BTreeMap<String, u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            daily_total_mins: None,
            categories: BTreeMap::from([
                ("social".to_string(), 120),
                ("entertainment".to_string(), 180),
                ("news".to_string(), 60),
            ]),
            domains: BTreeMap::from([
                ("facebook.com".to_string(), 30),
                ("twitter.com".to_string(), 30),
                ("youtube.com".to_string(), 60),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub whitelist: Vec<String>,
    pub limits: Limits,
    pub retention_days: u32,
    /// Seconds without input before ticks count as idle.
    pub idle_threshold_secs: u64,
    /// Seconds without input before the open interval is force-closed.
    pub idle_auto_close_secs: u64,
    pub merge_grace_secs: u64,
    pub nudge_cooldown_mins: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            whitelist: [
                "instagram.com",
                "tiktok.com",
                "youtube.com",
                "primevideo.com",
                "hotstar.com",
                "netflix.com",
                "facebook.com",
                "twitter.com",
                "snapchat.com",
                "linkedin.com",
                "reddit.com",
                "pinterest.com",
                "discord.com",
                "twitch.tv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            limits: Limits::default(),
            retention_days: 90,
            idle_threshold_secs: 10,
            idle_auto_close_secs: 600,
            merge_grace_secs: 30,
            nudge_cooldown_mins: 30,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.idle_threshold_secs == 0 {
            bail!("idleThresholdSecs must be greater than zero");
        }
        if self.idle_auto_close_secs < self.idle_threshold_secs {
            bail!("idleAutoCloseSecs must not be shorter than idleThresholdSecs");
        }
        if self.retention_days == 0 {
            bail!("retentionDays must be greater than zero");
        }
        Ok(())
    }

    /// One entry per top-level key, as stored in the settings table.
    pub fn to_entries(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => bail!("settings did not serialize to an object"),
        }
    }

    /// Build from stored entries. Each key that is missing or does not parse
    /// keeps its default.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let defaults = Self::default();
        let mut merged = match defaults.to_entries() {
            Ok(map) => map,
            Err(_) => return defaults,
        };

        for (key, value) in entries {
            if !merged.contains_key(key) {
                continue;
            }
            let mut candidate = merged.clone();
            candidate.insert(key.clone(), value.clone());
            if serde_json::from_value::<Self>(Value::Object(candidate)).is_ok() {
                merged.insert(key.clone(), value.clone());
            } else {
                warn!("Ignoring invalid stored setting {key}; using default");
            }
        }

        let settings: Self = serde_json::from_value(Value::Object(merged)).unwrap_or(defaults);
        if let Err(err) = settings.validate() {
            warn!("Stored settings are inconsistent ({err}); using defaults");
            return Self::default();
        }
        settings
    }
}

/// Read-mostly settings shared by every component. Reads clone the current
/// value; writes go to the store first and then replace the in-memory copy.
pub struct SettingsStore {
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            data: RwLock::new(settings),
        }
    }

    pub async fn load(db: &Database) -> Result<Self> {
        let stored = db.all_settings().await?;
        let settings = TrackerSettings::from_entries(stored.iter());
        info!(
            "Loaded settings: {} whitelisted domains, idle threshold {}s",
            settings.whitelist.len(),
            settings.idle_threshold_secs
        );
        Ok(Self::new(settings))
    }

    pub fn current(&self) -> TrackerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn update(&self, db: &Database, settings: TrackerSettings) -> Result<()> {
        settings.validate()?;
        for (key, value) in settings.to_entries()? {
            db.set_setting(&key, &value).await?;
        }

        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        Ok(())
    }

    /// Store entries the database does not hold yet, then reload. Returns the
    /// number of keys written.
    pub async fn apply_missing(&self, db: &Database, entries: &Map<String, Value>) -> Result<usize> {
        let existing = db.all_settings().await?;
        let defaults = TrackerSettings::default().to_entries()?;
        let mut written = 0;
        for (key, value) in entries {
            if existing.contains_key(key) || !defaults.contains_key(key) {
                continue;
            }
            db.set_setting(key, value).await?;
            written += 1;
        }

        if written > 0 {
            let reloaded = TrackerSettings::from_entries(db.all_settings().await?.iter());
            let mut guard = match self.data.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = reloaded;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::temp_database;
    use serde_json::json;

    #[test]
    fn defaults_are_valid() {
        let settings = TrackerSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.idle_threshold_secs, 10);
        assert_eq!(settings.idle_auto_close_secs, 600);
        assert_eq!(settings.merge_grace_secs, 30);
        assert_eq!(settings.retention_days, 90);
        assert!(settings.whitelist.contains(&"youtube.com".to_string()));
    }

    #[test]
    fn invalid_entries_fall_back_per_key() {
        let entries = BTreeMap::from([
            ("retentionDays".to_string(), json!("ninety")),
            ("mergeGraceSecs".to_string(), json!(45)),
            ("unknownKey".to_string(), json!(true)),
        ]);
        let settings = TrackerSettings::from_entries(entries.iter());
        assert_eq!(settings.retention_days, 90);
        assert_eq!(settings.merge_grace_secs, 45);
    }

    #[test]
    fn inconsistent_thresholds_are_rejected() {
        let settings = TrackerSettings {
            idle_threshold_secs: 60,
            idle_auto_close_secs: 30,
            ..TrackerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn update_is_visible_to_next_read_and_persists() {
        let (_dir, db) = temp_database();
        let store = SettingsStore::load(&db).await.unwrap();
        assert_eq!(store.current(), TrackerSettings::default());

        let updated = TrackerSettings {
            whitelist: vec!["github.com".into()],
            idle_threshold_secs: 5,
            ..TrackerSettings::default()
        };
        store.update(&db, updated.clone()).await.unwrap();
        assert_eq!(store.current(), updated);

        let reloaded = SettingsStore::load(&db).await.unwrap();
        assert_eq!(reloaded.current(), updated);
    }

    #[tokio::test]
    async fn apply_missing_never_overwrites() {
        let (_dir, db) = temp_database();
        db.set_setting("retentionDays", &json!(30)).await.unwrap();
        let store = SettingsStore::load(&db).await.unwrap();

        let mut incoming = Map::new();
        incoming.insert("retentionDays".into(), json!(7));
        incoming.insert("mergeGraceSecs".into(), json!(60));
        incoming.insert("bogus".into(), json!(1));

        let written = store.apply_missing(&db, &incoming).await.unwrap();
        assert_eq!(written, 1);
        let current = store.current();
        assert_eq!(current.retention_days, 30);
        assert_eq!(current.merge_grace_secs, 60);
    }
}

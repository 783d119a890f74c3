//! Process configuration read from the environment at startup.
//!
//! Tracker behaviour (whitelist, limits, thresholds) lives in
//! [`crate::settings`]; this only covers where data goes and how chatty the
//! host is.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::LevelFilter;

pub const DATA_DIR_ENV: &str = "CONSCIOUS_TAB_DATA_DIR";
pub const DEBUG_ENV: &str = "CONSCIOUS_TAB_DEBUG";

const APP_DIR_NAME: &str = "conscious-tab";
const DB_FILE_NAME: &str = "conscious-tab.sqlite3";

/// Ticks between heartbeat writes of the open interval.
const HEARTBEAT_TICKS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    data_dir: PathBuf,
    debug: bool,
}

impl HostConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source so tests need not touch the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_dir = match lookup(DATA_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|base| base.join(APP_DIR_NAME))
                .context("no platform data directory; set CONSCIOUS_TAB_DATA_DIR")?,
        };

        let debug = lookup(DEBUG_ENV)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true"))
            .unwrap_or(false);

        Ok(Self { data_dir, debug })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Debug mode persists the open interval on every tick.
    pub fn heartbeat_every_ticks(&self) -> u32 {
        if self.debug {
            1
        } else {
            HEARTBEAT_TICKS
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

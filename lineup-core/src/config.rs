//! Aggregated configuration.

use crate::error::CoreResult;
use lineup_cache::CacheConfig;
use lineup_store::StoreConfig;
use lineup_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything needed to open a [`LineupCore`](crate::LineupCore).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LineupConfig {
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub cache: CacheConfig,

    /// Festival year shown and synced at startup.
    pub event_year: i32,
}

impl Default for LineupConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            cache: CacheConfig::default(),
            event_year: 2026,
        }
    }
}

impl LineupConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The profile registry database, next to the preference database.
    pub fn registry_path(&self) -> Option<PathBuf> {
        self.store
            .path
            .as_deref()
            .map(|p| p.with_extension("profiles.sqlite"))
    }
}

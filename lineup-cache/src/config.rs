//! Cache and coordinator configuration.

use crate::row::SortKey;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the derived cache and its coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Largest item list a rebuild accepts. Bigger requests keep the old rows.
    pub max_capacity: usize,

    /// Upstream readiness polls before giving up with an empty cache.
    pub wait_max_attempts: u32,

    /// Pause between readiness polls.
    pub wait_cooldown_ms: u64,

    /// Notifications are suppressed this long after a profile switch.
    pub profile_switch_quiet_ms: u64,

    /// Ceiling for collecting the full upstream item set.
    pub collect_timeout_ms: u64,

    /// Ordering of list rows.
    pub sort_key: SortKey,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            wait_max_attempts: 20,
            wait_cooldown_ms: 500,
            profile_switch_quiet_ms: 1_500,
            collect_timeout_ms: 10_000,
            sort_key: SortKey::Name,
        }
    }
}

impl CacheConfig {
    pub fn wait_cooldown(&self) -> Duration {
        Duration::from_millis(self.wait_cooldown_ms)
    }

    pub fn profile_switch_quiet(&self) -> Duration {
        Duration::from_millis(self.profile_switch_quiet_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_with_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{ "sort_key": "time" }"#).unwrap();
        assert_eq!(config.sort_key, SortKey::Time);
        assert_eq!(config.max_capacity, 10_000);
        let back: CacheConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}

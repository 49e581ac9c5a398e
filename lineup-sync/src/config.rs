//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between background full sync passes.
    pub poll_interval_secs: u64,

    /// Ceiling for any single remote call. A call that exceeds it ends the pass.
    pub remote_timeout_secs: u64,

    /// Push each local edit of the owner profile as soon as it is made.
    pub write_through: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            remote_timeout_secs: 15,
            write_through: true,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "write_through": false }"#).unwrap();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.remote_timeout_secs, 15);
        assert!(!config.write_through);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = SyncConfig {
            poll_interval_secs: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }
}

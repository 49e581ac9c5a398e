//! Epoch-seconds clock helpers.
//!
//! Record timestamps are fractional seconds since the Unix epoch, the same
//! unit the remote store payloads carry.

use chrono::{DateTime, Utc};

/// Current time in epoch seconds with millisecond precision.
pub fn now_epoch_secs() -> f64 {
    to_epoch_secs(Utc::now())
}

pub fn to_epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

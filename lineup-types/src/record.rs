use crate::{AttendanceIndex, AttendanceStatus, DeviceId, Priority};
use serde::{Deserialize, Serialize};

/// One band's priority mark within a profile. Unique on `(band, year, profile)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityRecord {
    pub band: String,
    pub year: i32,
    pub profile: String,
    pub priority: Priority,
    /// Epoch seconds of the write; absent for rows written by very old clients.
    pub last_modified: Option<f64>,
    pub origin_device: Option<DeviceId>,
}

/// One event's attendance mark within a profile. Unique on `(index, profile)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub index: AttendanceIndex,
    pub profile: String,
    pub status: AttendanceStatus,
    /// Numeric sort key of the event; a hash of the index when the schedule
    /// could not resolve it.
    pub time_index: f64,
    pub last_modified: Option<f64>,
    pub origin_device: Option<DeviceId>,
}

impl AttendanceRecord {
    /// Stable fallback sort key derived from the index text (FNV-1a).
    pub fn fallback_time_index(index: &AttendanceIndex) -> f64 {
        let mut hash: u32 = 0x811c_9dc5;
        for byte in index.to_string().bytes() {
            hash ^= u32::from(byte);
            hash = hash.wrapping_mul(0x0100_0193);
        }
        f64::from(hash)
    }
}

//! Remote key and value encoding.
//!
//! Keys are `bandName:<band>` for priorities and `eventName:<index>` for
//! attendance, where `<index>` is the colon-joined [`AttendanceIndex`].
//! Values are `<payload>:<deviceUID>:<timestamp>`.

use crate::error::{SyncError, SyncResult};
use lineup_types::{AttendanceIndex, AttendanceStatus, DeviceId, Priority};
use std::fmt;

pub const PRIORITY_KEY_PREFIX: &str = "bandName:";
pub const ATTENDANCE_KEY_PREFIX: &str = "eventName:";

/// A parsed remote key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteKey {
    Priority(String),
    Attendance(AttendanceIndex),
}

impl RemoteKey {
    pub fn parse(raw: &str) -> SyncResult<Self> {
        if let Some(band) = raw.strip_prefix(PRIORITY_KEY_PREFIX) {
            if band.is_empty() {
                return Err(SyncError::MalformedKey {
                    key: raw.to_string(),
                    reason: "empty band name".into(),
                });
            }
            return Ok(RemoteKey::Priority(band.to_string()));
        }
        if let Some(index) = raw.strip_prefix(ATTENDANCE_KEY_PREFIX) {
            return index
                .parse::<AttendanceIndex>()
                .map(RemoteKey::Attendance)
                .map_err(|e| SyncError::MalformedKey {
                    key: raw.to_string(),
                    reason: e.to_string(),
                });
        }
        Err(SyncError::UnknownKey(raw.to_string()))
    }

    pub fn band(&self) -> &str {
        match self {
            RemoteKey::Priority(band) => band,
            RemoteKey::Attendance(index) => &index.band,
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteKey::Priority(band) => write!(f, "{PRIORITY_KEY_PREFIX}{band}"),
            RemoteKey::Attendance(index) => write!(f, "{ATTENDANCE_KEY_PREFIX}{index}"),
        }
    }
}

/// A parsed remote value.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteValue {
    pub payload: String,
    pub device: DeviceId,
    /// Epoch seconds of the write.
    pub timestamp: f64,
}

impl RemoteValue {
    pub fn new(payload: impl Into<String>, device: DeviceId, timestamp: f64) -> Self {
        Self {
            payload: payload.into(),
            device,
            timestamp,
        }
    }

    /// Parses `payload:deviceUID:timestamp`. Exactly three fields are accepted.
    pub fn parse(raw: &str) -> SyncResult<Self> {
        let malformed = |reason: String| SyncError::MalformedValue {
            value: raw.to_string(),
            reason,
        };
        let fields: Vec<&str> = raw.split(':').collect();
        let [payload, device, timestamp] = fields.as_slice() else {
            return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
        };
        if payload.is_empty() || device.is_empty() {
            return Err(malformed("empty payload or device".into()));
        }
        let timestamp: f64 = timestamp
            .trim()
            .parse()
            .map_err(|_| malformed(format!("invalid timestamp {timestamp:?}")))?;
        if !timestamp.is_finite() {
            return Err(malformed("non-finite timestamp".into()));
        }
        Ok(Self::new(*payload, DeviceId::from(*device), timestamp))
    }

    pub fn priority(&self) -> SyncResult<Priority> {
        self.payload
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(Priority::from_code)
            .ok_or_else(|| self.bad_payload("priority"))
    }

    /// Accepts numeric codes and the legacy `sawAll`/`sawSome`/`sawNone` tokens.
    pub fn attendance(&self) -> SyncResult<AttendanceStatus> {
        AttendanceStatus::from_payload(self.payload.trim()).ok_or_else(|| self.bad_payload("attendance"))
    }

    fn bad_payload(&self, kind: &str) -> SyncError {
        SyncError::MalformedValue {
            value: self.to_string(),
            reason: format!("invalid {kind} payload {:?}", self.payload),
        }
    }
}

impl fmt::Display for RemoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.payload, self.device, self.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineup_types::StartTime;
    use pretty_assertions::assert_eq;

    #[test]
    fn priority_key() {
        let key = RemoteKey::parse("bandName:Metallica").unwrap();
        assert_eq!(key, RemoteKey::Priority("Metallica".into()));
        assert_eq!(key.to_string(), "bandName:Metallica");
    }

    #[test]
    fn attendance_key_reassembles_start_time() {
        let key = RemoteKey::parse("eventName:Metallica:Pool Deck:09:05:Show:2026").unwrap();
        let RemoteKey::Attendance(index) = &key else {
            panic!("expected attendance key");
        };
        assert_eq!(index.location, "Pool Deck");
        assert_eq!(index.start_time, StartTime::new(9, 5).unwrap());
        assert_eq!(index.year, 2026);
        assert_eq!(key.band(), "Metallica");
        assert_eq!(key.to_string(), "eventName:Metallica:Pool Deck:09:05:Show:2026");
    }

    #[test]
    fn attendance_key_with_wrong_field_count_is_malformed() {
        assert!(matches!(
            RemoteKey::parse("eventName:Metallica:Pool Deck:09:Show:2026"),
            Err(SyncError::MalformedKey { .. })
        ));
    }

    #[test]
    fn foreign_keys_are_unknown() {
        assert!(matches!(
            RemoteKey::parse("lastSyncDate"),
            Err(SyncError::UnknownKey(_))
        ));
    }

    #[test]
    fn value_parses_three_fields() {
        let value = RemoteValue::parse("2:deviceB:200").unwrap();
        assert_eq!(value.payload, "2");
        assert_eq!(value.device, DeviceId::from("deviceB"));
        assert_eq!(value.timestamp, 200.0);
        assert_eq!(value.priority().unwrap(), Priority::Might);
        assert_eq!(value.to_string(), "2:deviceB:200");
    }

    #[test]
    fn fractional_timestamps_survive() {
        let value = RemoteValue::parse("1:d:1700000000.25").unwrap();
        assert_eq!(value.timestamp, 1_700_000_000.25);
        assert_eq!(RemoteValue::parse(&value.to_string()).unwrap(), value);
    }

    #[test]
    fn value_with_wrong_field_count_is_malformed() {
        assert!(RemoteValue::parse("2:deviceB").is_err());
        assert!(RemoteValue::parse("2:deviceB:200:extra").is_err());
        assert!(RemoteValue::parse("2:deviceB:soon").is_err());
    }

    #[test]
    fn legacy_attendance_tokens() {
        let value = RemoteValue::parse("sawAll:deviceB:10").unwrap();
        assert_eq!(value.attendance().unwrap(), AttendanceStatus::SawAll);
        let value = RemoteValue::parse("3:deviceB:10").unwrap();
        assert_eq!(value.attendance().unwrap(), AttendanceStatus::SawNone);
        let value = RemoteValue::parse("maybe:deviceB:10").unwrap();
        assert!(value.attendance().is_err());
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let value = RemoteValue::parse("9:deviceB:10").unwrap();
        assert!(value.priority().is_err());
    }
}

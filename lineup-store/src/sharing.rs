//! Shareable profile documents.
//!
//! A profile is shared as a small JSON file:
//!
//! ```json
//! {
//!   "senderUserId": "6F1C…",
//!   "senderName": "Alex",
//!   "shareDate": "2026-01-31T18:00:00Z",
//!   "eventYear": 2026,
//!   "priorities": { "Metallica": 1 },
//!   "attendance": { "Metallica:Pool Deck:20:30:Show:2026": 2 },
//!   "version": "1.0"
//! }
//! ```
//!
//! Importing a document creates or updates exactly one profile keyed by
//! `senderUserId`. Re-importing replaces that profile's marks.

use crate::error::{StoreError, StoreResult};
use crate::preference_store::PreferenceStore;
use crate::profile_registry::ProfileRegistry;
use crate::worker::WriteCompletion;
use chrono::{DateTime, Utc};
use lineup_types::time::to_epoch_secs;
use lineup_types::{
    AttendanceIndex, AttendanceRecord, AttendanceStatus, DeviceId, Priority, PriorityRecord,
    Profile, is_default_profile,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Version written into exported documents.
pub const SHARE_FORMAT_VERSION: &str = "1.0";

/// Wire form of a shared profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedProfile {
    pub sender_user_id: String,
    pub sender_name: String,
    #[serde(with = "iso8601")]
    pub share_date: DateTime<Utc>,
    pub event_year: i32,
    pub priorities: BTreeMap<String, i64>,
    pub attendance: BTreeMap<String, i64>,
    pub version: String,
}

impl SharedProfile {
    /// Builds a document from one profile's marks for `year`. Unset marks are left out.
    pub fn from_store(
        store: &PreferenceStore,
        profile: &str,
        sender_user_id: &str,
        sender_name: &str,
        year: i32,
    ) -> Self {
        let priorities = store
            .get_all_priorities(year, profile)
            .into_iter()
            .filter(|(_, p)| p.is_set())
            .map(|(band, p)| (band, p.code()))
            .collect();
        let attendance = store
            .get_all_attendance_by_index(year, profile)
            .into_iter()
            .filter(|(_, s)| *s != AttendanceStatus::None)
            .map(|(index, s)| (index.to_string(), s.code()))
            .collect();
        Self {
            sender_user_id: sender_user_id.to_string(),
            sender_name: sender_name.to_string(),
            share_date: Utc::now(),
            event_year: year,
            priorities,
            attendance,
            version: SHARE_FORMAT_VERSION.to_string(),
        }
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses and validates a document.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let doc: Self = serde_json::from_str(json)?;
        doc.validate()?;
        Ok(doc)
    }

    fn validate(&self) -> StoreResult<()> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(StoreError::UnsupportedVersion(self.version.clone()));
        }
        if self.sender_user_id.trim().is_empty() {
            return Err(StoreError::InvalidDocument("senderUserId is empty".into()));
        }
        if is_default_profile(&self.sender_user_id) {
            return Err(StoreError::InvalidDocument(
                "senderUserId collides with the owner profile key".into(),
            ));
        }
        Ok(())
    }

    /// Priority records carried by the document. Invalid codes are skipped.
    pub fn priority_records(&self) -> Vec<PriorityRecord> {
        let stamp = to_epoch_secs(self.share_date);
        self.priorities
            .iter()
            .filter_map(|(band, code)| match Priority::from_code(*code) {
                Some(priority) => Some(PriorityRecord {
                    band: band.clone(),
                    year: self.event_year,
                    profile: self.sender_user_id.clone(),
                    priority,
                    last_modified: Some(stamp),
                    origin_device: Some(DeviceId::from(self.sender_user_id.as_str())),
                }),
                None => {
                    warn!("skipping shared priority for {band}: invalid code {code}");
                    None
                }
            })
            .collect()
    }

    /// Attendance records carried by the document. Invalid keys or codes are skipped.
    pub fn attendance_records(&self) -> Vec<AttendanceRecord> {
        let stamp = to_epoch_secs(self.share_date);
        self.attendance
            .iter()
            .filter_map(|(key, code)| {
                let index = match key.parse::<AttendanceIndex>() {
                    Ok(index) => index,
                    Err(e) => {
                        warn!("skipping shared attendance {key:?}: {e}");
                        return None;
                    }
                };
                let Some(status) = AttendanceStatus::from_code(*code) else {
                    warn!("skipping shared attendance {key:?}: invalid code {code}");
                    return None;
                };
                Some(AttendanceRecord {
                    time_index: AttendanceRecord::fallback_time_index(&index),
                    index,
                    profile: self.sender_user_id.clone(),
                    status,
                    last_modified: Some(stamp),
                    origin_device: Some(DeviceId::from(self.sender_user_id.as_str())),
                })
            })
            .collect()
    }

    /// Imports the document as the profile keyed by `senderUserId`.
    ///
    /// Existing marks of that profile are replaced; its color is kept. Blocks
    /// until the store has committed the import. If any step fails the
    /// profile row is not saved and the error is returned.
    pub fn import_into(&self, registry: &ProfileRegistry, label: &str) -> StoreResult<Profile> {
        self.validate()?;
        let store = registry.store();
        let user_id = self.sender_user_id.as_str();
        if !store.is_available() {
            return Err(StoreError::Unavailable);
        }

        let existing = registry.get_profile(user_id);
        committed("delete_profile", store.delete_profile(user_id))?;
        committed(
            "import_priorities",
            store.import_priority_records(user_id, self.priority_records()),
        )?;
        committed(
            "import_attendance",
            store.import_attendance(user_id, self.attendance_records()),
        )?;

        let counts = store.counts(user_id);
        let profile = Profile {
            user_id: user_id.to_string(),
            label: if label.trim().is_empty() {
                self.sender_name.clone()
            } else {
                label.to_string()
            },
            color: existing
                .as_ref()
                .map(|p| p.color.clone())
                .unwrap_or_else(|| registry.next_color()),
            is_read_only: existing.as_ref().map(|p| p.is_read_only).unwrap_or(true),
            import_date: Some(Utc::now()),
            share_date: Some(self.share_date),
            event_year: self.event_year,
            priority_count: counts.priorities,
            attendance_count: counts.attendance,
        };
        registry.save_profile(&profile)?;
        info!(
            "imported shared profile {user_id} ({} priorities, {} attendance)",
            counts.priorities, counts.attendance
        );
        Ok(profile)
    }
}

fn committed(op: &'static str, completion: WriteCompletion) -> StoreResult<()> {
    if completion.wait() {
        Ok(())
    } else {
        warn!("profile import stopped: `{op}` did not commit");
        Err(StoreError::WriteFailed(op))
    }
}

/// Second-precision ISO 8601 timestamps with a `Z` suffix.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the owner's own profile. It is the only profile that syncs.
pub const DEFAULT_PROFILE: &str = "Default";

/// Label given to registry rows synthesized for orphaned profile data.
pub const RECOVERED_LABEL: &str = "Recovered profile";

/// Colors handed out to profiles in order. The first entry is reserved for
/// the owner profile.
pub const PROFILE_PALETTE: &[&str] = &[
    "#FFFFFF", "#E74C3C", "#3498DB", "#2ECC71", "#F1C40F", "#9B59B6", "#E67E22", "#1ABC9C",
];

pub fn is_default_profile(user_id: &str) -> bool {
    user_id == DEFAULT_PROFILE
}

/// Metadata describing one isolated namespace of marks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Immutable key. `"Default"` for the owner, the sender's device id for imports.
    pub user_id: String,
    pub label: String,
    pub color: String,
    pub is_read_only: bool,
    pub import_date: Option<DateTime<Utc>>,
    pub share_date: Option<DateTime<Utc>>,
    pub event_year: i32,
    pub priority_count: u32,
    pub attendance_count: u32,
}

impl Profile {
    /// The owner's profile row.
    pub fn owner(event_year: i32) -> Self {
        Self {
            user_id: DEFAULT_PROFILE.to_string(),
            label: DEFAULT_PROFILE.to_string(),
            color: PROFILE_PALETTE[0].to_string(),
            is_read_only: false,
            import_date: None,
            share_date: None,
            event_year,
            priority_count: 0,
            attendance_count: 0,
        }
    }

    /// Placeholder row for data found without a registry entry.
    pub fn recovered(user_id: &str, color: &str, event_year: i32) -> Self {
        if is_default_profile(user_id) {
            return Self::owner(event_year);
        }
        Self {
            user_id: user_id.to_string(),
            label: RECOVERED_LABEL.to_string(),
            color: color.to_string(),
            is_read_only: true,
            import_date: None,
            share_date: None,
            event_year,
            priority_count: 0,
            attendance_count: 0,
        }
    }

    pub fn is_default(&self) -> bool {
        is_default_profile(&self.user_id)
    }
}

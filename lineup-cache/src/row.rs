//! Display rows and list ordering.

use crate::schedule::ListItem;
use lineup_types::{AttendanceIndex, AttendanceStatus, Priority};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Ordering of the list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    /// Alphabetical by band, events of a band grouped together.
    #[default]
    Name,
    /// Chronological by event.
    Time,
}

/// Sorts list items for display. Band-only items sort after events in time order.
pub fn sort_items(items: &mut [ListItem], sort: SortKey) {
    match sort {
        SortKey::Name => items.sort_by(|a, b| {
            a.band
                .to_lowercase()
                .cmp(&b.band.to_lowercase())
                .then_with(|| cmp_time(a.time_index, b.time_index))
        }),
        SortKey::Time => items.sort_by(|a, b| {
            cmp_time(a.time_index, b.time_index)
                .then_with(|| a.band.to_lowercase().cmp(&b.band.to_lowercase()))
        }),
    }
}

fn cmp_time(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// One precomputed list row. Derived only; rebuilt from the store and the
/// schedule whenever needed.
#[derive(Debug, Clone, PartialEq)]
pub struct CellDisplayRow {
    pub position: usize,
    pub band: String,
    pub time_index: Option<f64>,
    /// Attendance key of the event shown in this row, if it is an event row
    /// whose schedule facts resolved.
    pub index: Option<AttendanceIndex>,
    pub location: String,
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub event_type: String,
    pub notes: String,
    pub priority: Priority,
    pub priority_icon: Option<&'static str>,
    pub attendance: AttendanceStatus,
    pub attendance_icon: Option<&'static str>,
    /// Set for a name-sorted row that repeats the previous row's band.
    pub is_partial_info: bool,
    /// Epoch seconds when this row was last computed.
    pub cache_timestamp: f64,
}

impl CellDisplayRow {
    pub(crate) fn set_priority(&mut self, priority: Priority, now: f64) {
        self.priority = priority;
        self.priority_icon = priority.icon();
        self.cache_timestamp = now;
    }

    pub(crate) fn set_attendance(&mut self, status: AttendanceStatus, now: f64) {
        self.attendance = status;
        self.attendance_icon = status.icon();
        self.cache_timestamp = now;
    }

    pub fn is_event(&self) -> bool {
        self.time_index.is_some()
    }
}

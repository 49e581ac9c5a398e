//! Shared value types for the lineup preference core.
//!
//! Everything here is plain data: priority and attendance marks, the
//! structured attendance key, profile metadata, device identity and the
//! typed change bus that connects the store to the display cache.

mod attendance;
mod events;
mod ids;
mod priority;
mod profile;
mod record;
pub mod time;

pub use attendance::{AttendanceIndex, AttendanceStatus, ParseIndexError, StartTime};
pub use events::{ChangeBus, ChangeKind, EntityChanged};
pub use ids::DeviceId;
pub use priority::Priority;
pub use profile::{DEFAULT_PROFILE, PROFILE_PALETTE, Profile, RECOVERED_LABEL, is_default_profile};
pub use record::{AttendanceRecord, PriorityRecord};

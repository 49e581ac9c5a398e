//! Precomputed list rows for the active profile, kept coherent with the
//! preference store and the schedule.
//!
//! [`DerivedCellCache`] owns the row array. [`CacheCoordinator`] waits for
//! schedule data, performs the initial build and turns change notifications
//! into incremental patches.

mod cache;
mod config;
mod coordinator;
mod error;
mod row;
mod schedule;
mod wait;

pub use cache::{CacheContext, DerivedCellCache};
pub use config::CacheConfig;
pub use coordinator::{CacheCoordinator, CacheEvent, CoordinatorHandle, CoordinatorState};
pub use error::{CacheError, CacheResult};
pub use row::{CellDisplayRow, SortKey, sort_items};
pub use schedule::{EventField, ListItem, ScheduleEvent, ScheduleProvider, StaticSchedule};
pub use wait::{WaitDecision, WaitPolicy};

//! Local-first storage for lineup marks.
//!
//! # Architecture
//!
//! - [`PreferenceStore`] holds priority and attendance records in SQLite.
//!   Every record is scoped by an explicit profile key. One worker thread owns
//!   the connection and runs all reads and writes in submission order.
//! - [`ProfileRegistry`] holds profile metadata in a separate database and
//!   restores rows for profiles that have data but no metadata.
//! - [`SharedProfile`] is the JSON document used to hand a profile to someone else.
//!
//! Opening failures degrade the store to a logged no-op instead of failing the caller.

mod config;
mod error;
mod preference_store;
mod profile_registry;
mod schema;
mod sharing;
mod worker;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use preference_store::{PreferenceStore, ProfileCounts};
pub use profile_registry::ProfileRegistry;
pub use schema::preference_schema_version;
pub use sharing::{SHARE_FORMAT_VERSION, SharedProfile};
pub use worker::WriteCompletion;

//! Sync of the owner's marks with the remote key/value store.
//!
//! - [`RemoteKv`]: the remote store collaborator, with [`MemoryKv`] as an
//!   in-process implementation
//! - [`RemoteKey`] / [`RemoteValue`]: the key and value wire format
//! - [`SyncEngine`]: pull, push, full sync, write-through and the
//!   background loop driven through a [`SyncHandle`]

mod config;
mod error;
mod remote_kv;
mod sync_engine;
mod wire;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use remote_kv::{MemoryKv, RemoteChange, RemoteKv};
pub use sync_engine::{
    MergeDecision, SyncCommand, SyncEngine, SyncHandle, SyncReport, decide,
};
pub use wire::{ATTENDANCE_KEY_PREFIX, PRIORITY_KEY_PREFIX, RemoteKey, RemoteValue};

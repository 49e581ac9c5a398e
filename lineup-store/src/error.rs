//! Error types for the preference store and profile registry.

use thiserror::Error;

/// All errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema migration to version {version} failed: {reason}")]
    Migration { version: i64, reason: String },

    #[error("invalid attendance index: {0}")]
    InvalidIndex(#[from] lineup_types::ParseIndexError),

    #[error("store write `{0}` did not commit")]
    WriteFailed(&'static str),

    #[error("store is unavailable")]
    Unavailable,

    #[error("store request timed out after {0} ms")]
    Timeout(u64),

    #[error("invalid shared profile document: {0}")]
    InvalidDocument(String),

    #[error("unsupported shared profile version: {0}")]
    UnsupportedVersion(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("the owner profile cannot be deleted")]
    OwnerProfile,
}

pub type StoreResult<T> = Result<T, StoreError>;

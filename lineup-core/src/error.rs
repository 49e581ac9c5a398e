//! Error types for the facade.

use lineup_cache::CacheError;
use lineup_store::StoreError;
use lineup_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("profile {0} is read-only")]
    ReadOnlyProfile(String),

    #[error("profile not found: {0}")]
    ProfileNotFound(String),

    #[error("write `{0}` was not committed")]
    WriteFailed(&'static str),

    #[error("background task failed: {0}")]
    Task(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

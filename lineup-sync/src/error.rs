//! Error types for remote sync.

use thiserror::Error;

/// All errors that can occur while talking to the remote store.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote store error: {0}")]
    Remote(String),

    #[error("remote call `{op}` timed out after {secs}s")]
    Timeout { op: &'static str, secs: u64 },

    #[error("key is not a lineup key: {0}")]
    UnknownKey(String),

    #[error("malformed remote key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    #[error("malformed remote value {value:?}: {reason}")]
    MalformedValue { value: String, reason: String },

    #[error("sync engine not running")]
    ChannelClosed,
}

pub type SyncResult<T> = Result<T, SyncError>;

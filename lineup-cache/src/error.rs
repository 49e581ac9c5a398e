//! Error types for the display cache.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("rebuild of {requested} rows exceeds capacity {max}")]
    OverCapacity { requested: usize, max: usize },

    #[error("rebuild task failed: {0}")]
    Task(String),

    #[error("cache coordinator not running")]
    ChannelClosed,
}

pub type CacheResult<T> = Result<T, CacheError>;

//! Error types for rate limiters

use thiserror::Error;
use tollgate_storage::StorageError;

/// Type alias for Results using LimiterError
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Errors a rate limit check can fail with
#[derive(Error, Debug)]
pub enum LimiterError {
    /// Invalid limiter configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Persisted state could not be parsed
    #[error("Corrupt limiter state at {key}: {reason}")]
    CorruptState {
        /// Storage key holding the bad value
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

impl LimiterError {
    /// Check if retrying the same call might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LimiterError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

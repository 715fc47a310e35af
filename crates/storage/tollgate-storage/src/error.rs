//! Error types for the storage module

use thiserror::Error;

/// Type alias for Results using StorageError
pub type Result<T> = std::result::Result<T, StorageError>;

/// Main error type for storage operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation timeout
    #[error("Operation timeout")]
    Timeout,

    /// Storage is full
    #[error("Storage is full")]
    StorageFull,

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Stored value could not be interpreted for the requested operation
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Unsupported operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Other error with custom message
    #[error("{0}")]
    Other(String),
}

/// Backend-specific errors
#[derive(Error, Debug)]
pub enum BackendError {
    /// Redis error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Memory backend error
    #[error("Memory backend error: {0}")]
    Memory(String),
}

impl StorageError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Timeout => true,
            #[cfg(feature = "redis")]
            StorageError::Backend(BackendError::Redis(e)) => {
                e.is_timeout() || e.is_connection_dropped() || e.is_io_error()
            }
            _ => false,
        }
    }

    /// Check if the error indicates data not found
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Check if the error is due to storage being full
    pub fn is_storage_full(&self) -> bool {
        matches!(self, StorageError::StorageFull)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(e: redis::RedisError) -> Self {
        StorageError::Backend(BackendError::Redis(e))
    }
}

impl From<String> for StorageError {
    fn from(s: String) -> Self {
        StorageError::Other(s)
    }
}

impl From<&str> for StorageError {
    fn from(s: &str) -> Self {
        StorageError::Other(s.to_string())
    }
}

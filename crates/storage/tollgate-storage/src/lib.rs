//! Tollgate Storage - pluggable state storage for rate limiters
//!
//! This crate provides a small key/value and sorted-set abstraction that rate
//! limiting algorithms keep their per-key state in, with an in-memory backend
//! for single-process use and a Redis backend for sharing limits between
//! processes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backends;
pub mod clock;
pub mod config;
pub mod error;
pub mod traits;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MemoryConfig, RedisConfig, StorageConfig};
pub use error::{BackendError, Result, StorageError};
pub use traits::{ScriptStorage, SortedSetMember, SortedSetStorage, Storage};

use std::sync::Arc;

/// Builds a storage backend from configuration
pub struct StorageBuilder {
    config: StorageConfig,
    clock: Arc<dyn Clock>,
}

impl StorageBuilder {
    /// Create a new storage builder with the given configuration
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            clock: clock::system_clock(),
        }
    }

    /// Use a custom clock for expiry decisions (memory backend only)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the storage instance
    pub async fn build(self) -> Result<Arc<dyn SortedSetStorage>> {
        let storage: Arc<dyn SortedSetStorage> = match self.config {
            #[cfg(feature = "memory")]
            StorageConfig::Memory(cfg) => {
                tracing::debug!(max_keys = cfg.max_keys, "Building memory storage");
                Arc::new(backends::memory::MemoryStorage::with_clock(cfg, self.clock))
            }

            #[cfg(feature = "redis")]
            StorageConfig::Redis(cfg) => {
                tracing::debug!(url = %cfg.url, "Building redis storage");
                Arc::new(backends::redis::RedisStorage::new(cfg).await?)
            }

            #[allow(unreachable_patterns)]
            _ => {
                return Err(StorageError::Config(
                    "Storage backend not enabled in features".to_string(),
                ))
            }
        };

        Ok(storage)
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        clock::{Clock, ManualClock, SystemClock},
        config::StorageConfig,
        error::{Result, StorageError},
        traits::{ScriptStorage, SortedSetMember, SortedSetStorage, Storage},
        StorageBuilder,
    };
}

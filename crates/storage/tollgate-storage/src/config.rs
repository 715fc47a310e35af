//! Configuration structures for storage backends

use serde::{Deserialize, Serialize};

/// Main storage configuration enum
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// In-memory storage configuration
    #[cfg(feature = "memory")]
    Memory(MemoryConfig),

    /// Redis storage configuration
    #[cfg(feature = "redis")]
    Redis(RedisConfig),
}

#[cfg(feature = "memory")]
impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(MemoryConfig::default())
    }
}

/// Configuration for in-memory storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Initial capacity for the key map
    #[serde(default = "default_memory_capacity")]
    pub initial_capacity: usize,

    /// Maximum number of live keys (0 = unlimited)
    #[serde(default)]
    pub max_keys: usize,

    /// How often the background sweeper purges expired keys
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_memory_capacity(),
            max_keys: 0,
            cleanup_interval_ms: default_cleanup_interval_ms(),
        }
    }
}

/// Configuration for Redis storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing
    #[serde(default)]
    pub key_prefix: String,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

// Default value functions
fn default_memory_capacity() -> usize {
    1024
}

fn default_cleanup_interval_ms() -> u64 {
    1000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

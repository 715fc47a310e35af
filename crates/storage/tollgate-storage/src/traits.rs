//! Core storage traits that define the storage abstraction layer
//!
//! Storage is a generic string key/value store. Rate limiters compose keys
//! from the caller's identity (e.g. `user:alice`) plus algorithm-specific
//! suffixes, so a single backend can hold state for every limiter.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Core storage trait that all backends must implement
#[async_trait]
pub trait Storage: Send + Sync {
    /// Get a value by key. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value. `None` removes any expiry previously set on the key.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomically increment a counter, creating it at 1 if missing
    async fn increment(&self, key: &str) -> Result<i64> {
        self.increment_by(key, 1).await
    }

    /// Atomically add `n` to a counter and return the new value
    async fn increment_by(&self, key: &str, n: i64) -> Result<i64>;

    /// Delete a key together with its expiry and any sorted set under it
    async fn delete(&self, key: &str) -> Result<()>;

    /// Set an expiry on an existing key; fails with `NotFound` otherwise
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get several values at once. Missing keys are left out of the map.
    async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, String>>;

    /// Store several values at once with a shared expiry
    async fn set_multiple(&self, items: &[(&str, &str)], ttl: Option<Duration>) -> Result<()>;

    /// Release background resources
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Server-side scripting, when the backend can run a whole
    /// read-modify-write as one atomic step
    fn scripting(&self) -> Option<&dyn ScriptStorage> {
        None
    }
}

/// Lua script execution, for atomic multi-key updates shared between processes
///
/// `keys` are namespaced exactly like the keys of every other call. Scripts
/// reply with an array of strings.
#[async_trait]
pub trait ScriptStorage: Storage {
    /// Run `script` with `KEYS` set to `keys` and `ARGV` set to `args`
    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<Vec<String>>;
}

/// Sorted set operations, used by the sliding window log
#[async_trait]
pub trait SortedSetStorage: Storage {
    /// Add members to a sorted set, updating the score of existing members
    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<()>;

    /// Remove members with `min <= score <= max`, returning how many went
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Count members with `min <= score <= max`
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Number of members in a sorted set
    async fn zcard(&self, key: &str) -> Result<u64>;

    /// Members with `min <= score <= max`, lowest score first
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<SortedSetMember>>;
}

/// A member in a sorted set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortedSetMember {
    /// Ordering score
    pub score: f64,
    /// Member name, unique within the set
    pub member: String,
}

impl SortedSetMember {
    /// Create a new member
    pub fn new(score: f64, member: impl Into<String>) -> Self {
        Self {
            score,
            member: member.into(),
        }
    }
}

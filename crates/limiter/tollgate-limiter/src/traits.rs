//! The rate limiter abstraction and its decision type

use crate::config::Algorithm;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,

    /// The configured limit (bucket capacity or requests per window)
    pub limit: u32,

    /// Whole units still available after this decision
    pub remaining: u32,

    /// How long to wait before the same request could succeed (zero if allowed)
    pub retry_after: Duration,

    /// When the key is back at full capacity
    pub reset_at: DateTime<Utc>,
}

impl RateLimitResult {
    /// `retry_after` in whole seconds, rounded up
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

/// A per-key rate limiter
///
/// The key identifies who is being limited: a user ID, an API key, a client
/// address. Every key has independent state.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check and consume a single unit
    async fn allow(&self, key: &str) -> Result<bool> {
        self.allow_n(key, 1).await
    }

    /// Check and consume `n` units at once
    async fn allow_n(&self, key: &str, n: u32) -> Result<bool> {
        Ok(self.allow_with_info(key, n).await?.allowed)
    }

    /// Check and consume `n` units, reporting the full decision
    ///
    /// `n == 0` only inspects the current state.
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult>;

    /// Forget all state for a key
    async fn reset(&self, key: &str) -> Result<()>;

    /// The configured limit reported in results
    fn limit(&self) -> u32;

    /// The algorithm this limiter runs
    fn algorithm(&self) -> Algorithm;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_rounds_up() {
        let mut result = RateLimitResult {
            allowed: false,
            limit: 1,
            remaining: 0,
            retry_after: Duration::from_millis(1001),
            reset_at: Utc::now(),
        };
        assert_eq!(result.retry_after_secs(), 2);

        result.retry_after = Duration::from_secs(3);
        assert_eq!(result.retry_after_secs(), 3);

        result.retry_after = Duration::ZERO;
        assert_eq!(result.retry_after_secs(), 0);
    }
}

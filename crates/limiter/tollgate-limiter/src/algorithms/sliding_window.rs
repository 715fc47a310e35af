//! Sliding window log
//!
//! Every admitted unit is logged with its timestamp in a sorted set. A
//! request is admitted when the log over the trailing window, plus the
//! request, stays within the rate. Exact, at the price of one log entry per
//! admitted unit.
//!
//! Storage layout per key: `{prefix}:sliding_window:{key}:log`, a sorted set
//! scored by unix µs that expires one window after its newest entry.
//! Backends with scripting trim, count and append in one script.

use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::scripts::{self, as_args, reply_allowed, reply_field};
use crate::state::{
    micros_to_datetime, micros_to_duration, record_decision, storage_key, KeyGuard, KeyLocks,
};
use crate::traits::{RateLimitResult, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tollgate_storage::clock::{system_clock, Clock};
use tollgate_storage::{ScriptStorage, SortedSetMember, SortedSetStorage};
use uuid::Uuid;

const LOG_FIELD: &str = "log";

/// Storage-backed sliding window limiter
pub struct SlidingWindow<S: SortedSetStorage + ?Sized> {
    storage: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    locks: &'static KeyLocks,
}

impl<S: SortedSetStorage + ?Sized> SlidingWindow<S> {
    /// Create a sliding window limiter reading the system clock
    pub fn new(storage: Arc<S>, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(storage, config, system_clock())
    }

    /// Create a sliding window limiter with a custom clock
    pub fn with_clock(storage: Arc<S>, config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            clock,
            locks: KeyLocks::global(),
        })
    }

    /// The limiter's configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    async fn lock(&self, key: &str) -> KeyGuard<'static> {
        self.locks
            .lock_state(&self.config.key_prefix, Algorithm::SlidingWindow, key)
            .await
    }

    fn log_key(&self, key: &str) -> String {
        storage_key(&self.config.key_prefix, Algorithm::SlidingWindow, key, LOG_FIELD)
    }
}

/// Unique log members for `n` units admitted at `now`
fn new_members(now: i64, n: u32) -> Vec<String> {
    (0..n).map(|_| format!("{now}-{}", Uuid::new_v4())).collect()
}

impl<S: SortedSetStorage + ?Sized> SlidingWindow<S> {
    /// Scores in the window before this request, and the decision
    async fn decide_locked(&self, log_key: &str, now: i64, n: u32) -> Result<(Vec<f64>, bool)> {
        // the window is (now - window, now]
        let cutoff = now.saturating_sub(self.config.window_micros());
        self.storage
            .zrem_range_by_score(log_key, f64::NEG_INFINITY, cutoff as f64)
            .await?;
        let scores: Vec<f64> = self
            .storage
            .zrange_by_score(log_key, f64::NEG_INFINITY, f64::INFINITY)
            .await?
            .into_iter()
            .map(|m| m.score)
            .collect();

        let allowed = scores.len() + n as usize <= self.config.rate as usize;
        if allowed && n > 0 {
            let members: Vec<SortedSetMember> = new_members(now, n)
                .into_iter()
                .map(|member| SortedSetMember::new(now as f64, member))
                .collect();
            self.storage.zadd(log_key, &members).await?;
            self.storage.expire(log_key, self.config.window()).await?;
        }
        Ok((scores, allowed))
    }

    async fn decide_scripted(
        &self,
        backend: &dyn ScriptStorage,
        log_key: &str,
        now: i64,
        n: u32,
    ) -> Result<(Vec<f64>, bool)> {
        let mut args = vec![
            now.to_string(),
            n.to_string(),
            self.config.rate.to_string(),
            self.config.window_micros().to_string(),
            self.config.window_ms.to_string(),
        ];
        // the script only adds them when the request is admitted
        if n as usize <= self.config.rate as usize {
            args.extend(new_members(now, n));
        }

        let reply = backend
            .eval(scripts::SLIDING_WINDOW, &[log_key], &as_args(&args))
            .await?;
        let allowed = reply_allowed(log_key, &reply)?;
        let scores = (1..reply.len())
            .map(|index| reply_field(log_key, &reply, index))
            .collect::<Result<Vec<f64>>>()?;
        Ok((scores, allowed))
    }

    /// Build the decision from the scores that were in the window
    fn result(&self, now: i64, scores: &[f64], n: u32, allowed: bool) -> RateLimitResult {
        let window = self.config.window_micros();
        let rate = self.config.rate as usize;
        let count = scores.len();
        let cost = n as usize;

        let retry_after = if allowed {
            Duration::ZERO
        } else if n > self.config.rate {
            self.config.window()
        } else {
            // enough of the oldest entries have to age out to make room
            let blocking = scores[count + cost - rate - 1] as i64;
            micros_to_duration((blocking + window - now) as f64)
        };

        let newest = if allowed && n > 0 {
            Some(now)
        } else {
            scores.last().map(|score| *score as i64)
        };
        let used = if allowed { count + cost } else { count };

        RateLimitResult {
            allowed,
            limit: self.config.rate,
            remaining: u32::try_from(rate.saturating_sub(used)).unwrap_or(0),
            retry_after,
            reset_at: micros_to_datetime(newest.map_or(now, |score| score.saturating_add(window))),
        }
    }
}

#[async_trait]
impl<S: SortedSetStorage + ?Sized + 'static> RateLimiter for SlidingWindow<S> {
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult> {
        let log_key = self.log_key(key);

        let (now, (scores, allowed)) = match self.storage.scripting() {
            Some(backend) => {
                let now = self.clock.now_micros();
                (now, self.decide_scripted(backend, &log_key, now, n).await?)
            }
            None => {
                let _guard = self.lock(key).await;
                let now = self.clock.now_micros();
                (now, self.decide_locked(&log_key, now, n).await?)
            }
        };

        let result = self.result(now, &scores, n, allowed);
        record_decision(Algorithm::SlidingWindow, key, n, &result);
        Ok(result)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.lock(key).await;
        self.storage.delete(&self.log_key(key)).await?;
        Ok(())
    }

    fn limit(&self) -> u32 {
        self.config.rate
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::SlidingWindow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_storage::backends::MemoryStorage;
    use tollgate_storage::{ManualClock, MemoryConfig};

    const START: i64 = 1_700_000_000_000_000;

    fn limiter(
        config: LimiterConfig,
    ) -> (SlidingWindow<MemoryStorage>, ManualClock, Arc<MemoryStorage>) {
        let clock = ManualClock::new(START);
        let storage = Arc::new(MemoryStorage::with_clock(
            MemoryConfig::default(),
            Arc::new(clock.clone()),
        ));
        let config = config.with_algorithm(Algorithm::SlidingWindow);
        let limiter =
            SlidingWindow::with_clock(Arc::clone(&storage), config, Arc::new(clock.clone()))
                .unwrap();
        (limiter, clock, storage)
    }

    #[tokio::test]
    async fn test_window_slides() {
        let (limiter, clock, _) = limiter(LimiterConfig::new(3, Duration::from_secs(1)));
        assert!(limiter.allow("k").await.unwrap());
        clock.advance(Duration::from_millis(400));
        assert!(limiter.allow_n("k", 2).await.unwrap());

        clock.advance(Duration::from_millis(100));
        let denied = limiter.allow_with_info("k", 1).await.unwrap();
        assert!(!denied.allowed);
        // the first entry ages out 1s after it was logged
        assert_eq!(denied.retry_after, Duration::from_millis(500));

        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow("k").await.unwrap());
        assert!(!limiter.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_boundary_burst() {
        let (limiter, clock, _) = limiter(LimiterConfig::new(2, Duration::from_secs(1)));
        clock.advance(Duration::from_millis(900));
        assert!(limiter.allow_n("k", 2).await.unwrap());
        // a fixed window would have reset here
        clock.advance(Duration::from_millis(200));
        assert!(!limiter.allow("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_retry_after_for_batches() {
        let (limiter, clock, _) = limiter(LimiterConfig::new(4, Duration::from_secs(1)));
        for _ in 0..4 {
            limiter.allow("k").await.unwrap();
            clock.advance(Duration::from_millis(100));
        }
        // needs the two oldest entries (t=0, t=100ms) gone
        let denied = limiter.allow_with_info("k", 2).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_remaining_and_reset_at() {
        let (limiter, clock, _) = limiter(LimiterConfig::new(5, Duration::from_secs(2)));
        let first = limiter.allow_with_info("k", 2).await.unwrap();
        assert_eq!(first.remaining, 3);
        assert_eq!(first.reset_at.timestamp_micros(), START + 2_000_000);

        clock.advance(Duration::from_millis(500));
        let peek = limiter.allow_with_info("k", 0).await.unwrap();
        assert!(peek.allowed);
        assert_eq!(peek.remaining, 3);
        assert_eq!(peek.reset_at.timestamp_micros(), START + 2_000_000);
    }

    #[tokio::test]
    async fn test_denied_request_logs_nothing() {
        let (limiter, _, storage) = limiter(LimiterConfig::new(2, Duration::from_secs(1)));
        assert!(!limiter.allow_n("k", 3).await.unwrap());
        assert!(storage.is_empty());

        limiter.allow_n("k", 2).await.unwrap();
        assert!(!limiter.allow("k").await.unwrap());
        assert_eq!(storage.zcard("ratelimit:sliding_window:k:log").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_log_expires() {
        let (limiter, clock, storage) = limiter(LimiterConfig::new(2, Duration::from_secs(1)));
        limiter.allow("k").await.unwrap();
        clock.advance(Duration::from_secs(1));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_reset() {
        let (limiter, _, _) = limiter(LimiterConfig::new(1, Duration::from_secs(30)));
        assert!(limiter.allow("k").await.unwrap());
        assert!(!limiter.allow("k").await.unwrap());
        limiter.reset("k").await.unwrap();
        assert!(limiter.allow("k").await.unwrap());
    }
}

//! Leaky bucket (as a meter)
//!
//! Requests pour units into a bucket that drains at `rate` per window. A
//! request that would overflow the capacity is rejected, so admitted traffic
//! is smoothed to the drain rate once the bucket is full.
//!
//! Storage layout per key:
//! - `{prefix}:leaky_bucket:{key}:level`     current fill level (f64)
//! - `{prefix}:leaky_bucket:{key}:last_leak` last drain timestamp (unix µs)
//!
//! Backends with scripting update both fields in one script.

use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::scripts::{self, as_args, reply_allowed, reply_field};
use crate::state::{
    micros_to_datetime, micros_to_duration, parse_field, record_decision, retry_delay, storage_key,
    KeyGuard, KeyLocks,
};
use crate::traits::{RateLimitResult, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tollgate_storage::clock::{system_clock, Clock};
use tollgate_storage::{ScriptStorage, Storage};

const LEVEL_FIELD: &str = "level";
const LAST_LEAK_FIELD: &str = "last_leak";

/// Storage-backed leaky bucket limiter
pub struct LeakyBucket<S: Storage + ?Sized> {
    storage: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    locks: &'static KeyLocks,
}

impl<S: Storage + ?Sized> LeakyBucket<S> {
    /// Create a leaky bucket limiter reading the system clock
    pub fn new(storage: Arc<S>, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(storage, config, system_clock())
    }

    /// Create a leaky bucket limiter with a custom clock
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
            .lock_state(&self.config.key_prefix, Algorithm::LeakyBucket, key)
            .await
    }

    fn key(&self, key: &str, field: &str) -> String {
        storage_key(&self.config.key_prefix, Algorithm::LeakyBucket, key, field)
    }
}

impl<S: Storage + ?Sized> LeakyBucket<S> {
    async fn decide_locked(
        &self,
        level_key: &str,
        leak_key: &str,
        now: i64,
        n: u32,
    ) -> Result<(f64, bool)> {
        let state = self.storage.get_multiple(&[level_key, leak_key]).await?;

        let mut level = match (state.get(level_key), state.get(leak_key)) {
            (Some(level), Some(last_leak)) => {
                let level: f64 = parse_field(level_key, level)?;
                let last_leak: i64 = parse_field(leak_key, last_leak)?;
                let elapsed = (now - last_leak).max(0) as f64;
                (level - self.config.tokens_for(elapsed)).max(0.0)
            }
            _ => 0.0,
        };

        let cost = f64::from(n);
        let allowed = level + cost <= f64::from(self.config.capacity());
        if allowed && n > 0 {
            level += cost;

            let ttl = micros_to_duration(self.config.micros_for(level)) + self.config.window();
            let level_value = level.to_string();
            let now_value = now.to_string();
            self.storage
                .set_multiple(
                    &[(level_key, level_value.as_str()), (leak_key, now_value.as_str())],
                    Some(ttl),
                )
                .await?;
        }
        Ok((level, allowed))
    }

    async fn decide_scripted(
        &self,
        backend: &dyn ScriptStorage,
        level_key: &str,
        leak_key: &str,
        now: i64,
        n: u32,
    ) -> Result<(f64, bool)> {
        let args = [
            now.to_string(),
            n.to_string(),
            self.config.capacity().to_string(),
            self.config.rate.to_string(),
            self.config.window_micros().to_string(),
        ];
        let reply = backend
            .eval(scripts::LEAKY_BUCKET, &[level_key, leak_key], &as_args(&args))
            .await?;
        Ok((
            reply_field(level_key, &reply, 1)?,
            reply_allowed(level_key, &reply)?,
        ))
    }

    /// Build the decision for a bucket at `level` after the request was applied
    fn result(&self, now: i64, level: f64, n: u32, allowed: bool) -> RateLimitResult {
        let capacity = f64::from(self.config.capacity());
        let cost = f64::from(n);

        let retry_after = if allowed {
            Duration::ZERO
        } else if n > self.config.capacity() {
            self.config.window()
        } else {
            retry_delay(self.config.micros_for(level + cost - capacity), |wait| {
                (level - self.config.tokens_for(wait)).max(0.0) + cost <= capacity
            })
        };
        let to_empty = micros_to_duration(self.config.micros_for(level));

        RateLimitResult {
            allowed,
            limit: self.config.capacity(),
            remaining: (capacity - level).floor().max(0.0) as u32,
            retry_after,
            reset_at: micros_to_datetime(now.saturating_add(to_empty.as_micros() as i64)),
        }
    }
}

#[async_trait]
impl<S: Storage + ?Sized + 'static> RateLimiter for LeakyBucket<S> {
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult> {
        let level_key = self.key(key, LEVEL_FIELD);
        let leak_key = self.key(key, LAST_LEAK_FIELD);

        let (now, (level, allowed)) = match self.storage.scripting() {
            Some(backend) => {
                let now = self.clock.now_micros();
                let decision = self
                    .decide_scripted(backend, &level_key, &leak_key, now, n)
                    .await?;
                (now, decision)
            }
            None => {
                let _guard = self.lock(key).await;
                let now = self.clock.now_micros();
                let decision = self.decide_locked(&level_key, &leak_key, now, n).await?;
                (now, decision)
            }
        };

        let result = self.result(now, level, n, allowed);
        record_decision(Algorithm::LeakyBucket, key, n, &result);
        Ok(result)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.lock(key).await;
        self.storage.delete(&self.key(key, LEVEL_FIELD)).await?;
        self.storage.delete(&self.key(key, LAST_LEAK_FIELD)).await?;
        Ok(())
    }

    fn limit(&self) -> u32 {
        self.config.capacity()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::LeakyBucket
    }
}

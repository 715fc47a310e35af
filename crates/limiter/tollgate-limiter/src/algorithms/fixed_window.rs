//! Fixed window counter
//!
//! Time is cut into windows aligned to the unix epoch and each key gets one
//! counter per window. Cheap, but a client can spend two windows' worth of
//! requests around a boundary.
//!
//! Storage layout per key: `{prefix}:fixed_window:{key}:{window_start_ms}`,
//! expiring at the end of its window. Backends with scripting check and
//! bump the counter in one script.

use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::scripts::{self, as_args, reply_allowed, reply_field};
use crate::state::{
    micros_to_datetime, micros_to_duration, parse_field, record_decision, storage_key, KeyGuard,
    KeyLocks,
};
use crate::traits::{RateLimitResult, RateLimiter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tollgate_storage::clock::{system_clock, Clock};
use tollgate_storage::{ScriptStorage, Storage};

/// Storage-backed fixed window limiter
pub struct FixedWindow<S: Storage + ?Sized> {
    storage: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    locks: &'static KeyLocks,
}

impl<S: Storage + ?Sized> FixedWindow<S> {
    /// Create a fixed window limiter reading the system clock
    pub fn new(storage: Arc<S>, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(storage, config, system_clock())
    }

    /// Create a fixed window limiter with a custom clock
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
            .lock_state(&self.config.key_prefix, Algorithm::FixedWindow, key)
            .await
    }

    /// Start of the window containing `now`, in unix µs
    fn window_start(&self, now: i64) -> i64 {
        now - now.rem_euclid(self.config.window_micros())
    }

    fn counter_key(&self, key: &str, window_start: i64) -> String {
        let start_ms = window_start.div_euclid(1_000);
        storage_key(
            &self.config.key_prefix,
            Algorithm::FixedWindow,
            key,
            &start_ms.to_string(),
        )
    }
}

impl<S: Storage + ?Sized> FixedWindow<S> {
    async fn decide_locked(&self, counter_key: &str, ttl: Duration, n: u32) -> Result<(i64, bool)> {
        let mut count: i64 = match self.storage.get(counter_key).await? {
            Some(raw) => parse_field(counter_key, &raw)?,
            None => 0,
        };

        let cost = i64::from(n);
        let allowed = count + cost <= i64::from(self.config.rate);
        if allowed && n > 0 {
            let fresh = count == 0;
            count = self.storage.increment_by(counter_key, cost).await?;
            if fresh {
                self.storage.expire(counter_key, ttl).await?;
            }
        }
        Ok((count, allowed))
    }

    async fn decide_scripted(
        &self,
        backend: &dyn ScriptStorage,
        counter_key: &str,
        ttl: Duration,
        n: u32,
    ) -> Result<(i64, bool)> {
        let ttl_ms = ttl.as_micros().div_ceil(1_000).max(1);
        let args = [n.to_string(), self.config.rate.to_string(), ttl_ms.to_string()];
        let reply = backend
            .eval(scripts::FIXED_WINDOW, &[counter_key], &as_args(&args))
            .await?;
        Ok((
            reply_field(counter_key, &reply, 1)?,
            reply_allowed(counter_key, &reply)?,
        ))
    }
}

#[async_trait]
impl<S: Storage + ?Sized + 'static> RateLimiter for FixedWindow<S> {
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult> {
        let scripting = self.storage.scripting();
        let _guard = match scripting {
            Some(_) => None,
            None => Some(self.lock(key).await),
        };

        let now = self.clock.now_micros();
        let start = self.window_start(now);
        let end = start.saturating_add(self.config.window_micros());
        let counter_key = self.counter_key(key, start);
        let ttl = micros_to_duration((end - now) as f64);

        let (count, allowed) = match scripting {
            Some(backend) => self.decide_scripted(backend, &counter_key, ttl, n).await?,
            None => self.decide_locked(&counter_key, ttl, n).await?,
        };

        let retry_after = if allowed {
            Duration::ZERO
        } else if n > self.config.rate {
            self.config.window()
        } else {
            ttl
        };

        let result = RateLimitResult {
            allowed,
            limit: self.config.rate,
            remaining: u32::try_from((i64::from(self.config.rate) - count).max(0)).unwrap_or(0),
            retry_after,
            reset_at: micros_to_datetime(end),
        };
        record_decision(Algorithm::FixedWindow, key, n, &result);
        Ok(result)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.lock(key).await;
        let start = self.window_start(self.clock.now_micros());
        self.storage.delete(&self.counter_key(key, start)).await?;
        Ok(())
    }

    fn limit(&self) -> u32 {
        self.config.rate
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::FixedWindow
    }
}

//! Token bucket over pluggable storage
//!
//! Tokens are added at a constant rate and requests consume them, so a key
//! may burst up to the bucket capacity and is then held to the refill rate.
//!
//! Storage layout per key:
//! - `{prefix}:token_bucket:{key}:tokens`      current tokens (f64)
//! - `{prefix}:token_bucket:{key}:last_refill` refill timestamp (unix µs)
//!
//! Both fields expire once the bucket would be full again, so idle keys
//! cost nothing and come back as a full bucket. Backends with scripting run
//! the refill and spend as one script, otherwise a per-key lock serialises
//! them within this process.

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
use tollgate_storage::clock::{system_clock, Clock};
use tollgate_storage::{ScriptStorage, Storage};

const TOKENS_FIELD: &str = "tokens";
const LAST_REFILL_FIELD: &str = "last_refill";

/// Storage-backed token bucket limiter
pub struct TokenBucket<S: Storage + ?Sized> {
    storage: Arc<S>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
    locks: &'static KeyLocks,
}

impl<S: Storage + ?Sized> TokenBucket<S> {
    /// Create a token bucket limiter reading the system clock
    pub fn new(storage: Arc<S>, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(storage, config, system_clock())
    }

    /// Create a token bucket limiter with a custom clock
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
            .lock_state(&self.config.key_prefix, Algorithm::TokenBucket, key)
            .await
    }

    fn key(&self, key: &str, field: &str) -> String {
        storage_key(&self.config.key_prefix, Algorithm::TokenBucket, key, field)
    }
}

/// Refill `tokens` for the time elapsed since `last_refill`, capped at capacity
pub(crate) fn refill(config: &LimiterConfig, tokens: f64, last_refill: i64, now: i64) -> f64 {
    let elapsed = (now - last_refill).max(0) as f64;
    (tokens + config.tokens_for(elapsed)).clamp(0.0, f64::from(config.capacity()))
}

/// Build the decision for a bucket holding `tokens` after the request was applied
pub(crate) fn bucket_result(
    config: &LimiterConfig,
    now: i64,
    tokens: f64,
    n: u32,
    allowed: bool,
) -> RateLimitResult {
    let capacity = f64::from(config.capacity());

    let retry_after = if allowed {
        std::time::Duration::ZERO
    } else if n > config.capacity() {
        // can never fit
        config.window()
    } else {
        let cost = f64::from(n);
        retry_delay(config.micros_for(cost - tokens), |wait| {
            refill(config, tokens, 0, wait as i64) >= cost
        })
    };
    let to_full = micros_to_duration(config.micros_for(capacity - tokens));

    RateLimitResult {
        allowed,
        limit: config.capacity(),
        remaining: tokens.floor().max(0.0) as u32,
        retry_after,
        reset_at: micros_to_datetime(now.saturating_add(to_full.as_micros() as i64)),
    }
}

impl<S: Storage + ?Sized> TokenBucket<S> {
    async fn decide_locked(
        &self,
        tokens_key: &str,
        refill_key: &str,
        now: i64,
        n: u32,
    ) -> Result<(f64, bool)> {
        let state = self.storage.get_multiple(&[tokens_key, refill_key]).await?;

        let mut tokens = match (state.get(tokens_key), state.get(refill_key)) {
            (Some(tokens), Some(last_refill)) => refill(
                &self.config,
                parse_field(tokens_key, tokens)?,
                parse_field(refill_key, last_refill)?,
                now,
            ),
            // first request, or the state expired: a full bucket
            _ => f64::from(self.config.capacity()),
        };

        let allowed = f64::from(n) <= tokens;
        if allowed && n > 0 {
            tokens -= f64::from(n);

            let to_full = self.config.micros_for(f64::from(self.config.capacity()) - tokens);
            let ttl = micros_to_duration(to_full) + self.config.window();
            let tokens_value = tokens.to_string();
            let now_value = now.to_string();
            self.storage
                .set_multiple(
                    &[
                        (tokens_key, tokens_value.as_str()),
                        (refill_key, now_value.as_str()),
                    ],
                    Some(ttl),
                )
                .await?;
        }
        Ok((tokens, allowed))
    }

    async fn decide_scripted(
        &self,
        backend: &dyn ScriptStorage,
        tokens_key: &str,
        refill_key: &str,
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
            .eval(scripts::TOKEN_BUCKET, &[tokens_key, refill_key], &as_args(&args))
            .await?;
        Ok((
            reply_field(tokens_key, &reply, 1)?,
            reply_allowed(tokens_key, &reply)?,
        ))
    }
}

#[async_trait]
impl<S: Storage + ?Sized + 'static> RateLimiter for TokenBucket<S> {
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult> {
        let tokens_key = self.key(key, TOKENS_FIELD);
        let refill_key = self.key(key, LAST_REFILL_FIELD);

        let (now, (tokens, allowed)) = match self.storage.scripting() {
            Some(backend) => {
                let now = self.clock.now_micros();
                let decision = self
                    .decide_scripted(backend, &tokens_key, &refill_key, now, n)
                    .await?;
                (now, decision)
            }
            None => {
                let _guard = self.lock(key).await;
                let now = self.clock.now_micros();
                let decision = self.decide_locked(&tokens_key, &refill_key, now, n).await?;
                (now, decision)
            }
        };

        let result = bucket_result(&self.config, now, tokens, n, allowed);
        record_decision(Algorithm::TokenBucket, key, n, &result);
        Ok(result)
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let _guard = self.lock(key).await;
        self.storage.delete(&self.key(key, TOKENS_FIELD)).await?;
        self.storage.delete(&self.key(key, LAST_REFILL_FIELD)).await?;
        Ok(())
    }

    fn limit(&self) -> u32 {
        self.config.capacity()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}

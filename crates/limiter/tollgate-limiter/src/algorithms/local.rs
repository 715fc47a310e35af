//! In-process token bucket
//!
//! Keeps every bucket in one mutex-guarded map, with no storage round trips.
//! The decisions are identical to [`TokenBucket`](super::TokenBucket), but
//! nothing is shared beyond the current process.

use super::token_bucket::{bucket_result, refill};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::state::record_decision;
use crate::traits::{RateLimitResult, RateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tollgate_storage::clock::{system_clock, Clock};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: i64,
}

/// Token bucket keeping state in process memory
#[derive(Debug)]
pub struct LocalTokenBucket {
    buckets: Mutex<HashMap<String, Bucket>>,
    config: LimiterConfig,
    clock: Arc<dyn Clock>,
}

impl LocalTokenBucket {
    /// Create a limiter reading the system clock
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Create a limiter with a custom clock
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            buckets: Mutex::new(HashMap::new()),
            config,
            clock,
        })
    }

    /// Check and consume one token
    pub fn allow(&self, key: &str) -> bool {
        self.allow_n(key, 1)
    }

    /// Check and consume `n` tokens
    pub fn allow_n(&self, key: &str, n: u32) -> bool {
        self.check(key, n).allowed
    }

    /// Check and consume `n` tokens, reporting the full decision
    pub fn check(&self, key: &str, n: u32) -> RateLimitResult {
        let now = self.clock.now_micros();
        let capacity = f64::from(self.config.capacity());
        let cost = f64::from(n);

        let mut buckets = self.buckets.lock();
        let (tokens, allowed) = match buckets.get_mut(key) {
            Some(bucket) => {
                bucket.tokens = refill(&self.config, bucket.tokens, bucket.last_refill, now);
                bucket.last_refill = now;

                let allowed = cost <= bucket.tokens;
                if allowed {
                    bucket.tokens -= cost;
                }
                (bucket.tokens, allowed)
            }
            // a new key only gets a bucket once it spends from it
            None if n == 0 => (capacity, true),
            None if cost <= capacity => {
                buckets.insert(
                    key.to_string(),
                    Bucket {
                        tokens: capacity - cost,
                        last_refill: now,
                    },
                );
                (capacity - cost, true)
            }
            None => (capacity, false),
        };
        drop(buckets);

        let result = bucket_result(&self.config, now, tokens, n, allowed);
        record_decision(Algorithm::TokenBucket, key, n, &result);
        result
    }

    /// Forget a key's bucket
    pub fn reset_key(&self, key: &str) {
        self.buckets.lock().remove(key);
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no key is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop buckets that have refilled completely, returning how many went
    ///
    /// A missing bucket behaves exactly like a full one, so this only
    /// reclaims memory.
    pub fn prune_full(&self) -> usize {
        let now = self.clock.now_micros();
        let capacity = f64::from(self.config.capacity());
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| refill(&self.config, b.tokens, b.last_refill, now) < capacity);
        before - buckets.len()
    }

    /// Run [`prune_full`](Self::prune_full) every `interval` on the current
    /// tokio runtime
    ///
    /// The task ends once the limiter is dropped, or when the handle is
    /// aborted.
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(limiter) = weak.upgrade() else {
                    break;
                };
                let pruned = limiter.prune_full();
                if pruned > 0 {
                    tracing::trace!(pruned, remaining = limiter.len(), "Pruned full buckets");
                }
            }
        })
    }
}

#[async_trait]
impl RateLimiter for LocalTokenBucket {
    async fn allow_with_info(&self, key: &str, n: u32) -> Result<RateLimitResult> {
        Ok(self.check(key, n))
    }

    async fn reset(&self, key: &str) -> Result<()> {
        self.reset_key(key);
        Ok(())
    }

    fn limit(&self) -> u32 {
        self.config.capacity()
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::TokenBucket
    }
}

//! Shared plumbing for the storage-backed algorithms: per-key locking,
//! storage key layout, time conversions and decision recording.

use crate::config::Algorithm;
use crate::error::{LimiterError, Result};
use crate::traits::RateLimitResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serialises read-modify-write cycles on the same key within this process
///
/// Limiters share [`KeyLocks::global`], so two limiters with the same key
/// prefix and algorithm exclude each other too.
#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    /// The process-wide table
    pub(crate) fn global() -> &'static KeyLocks {
        static LOCKS: OnceLock<KeyLocks> = OnceLock::new();
        LOCKS.get_or_init(KeyLocks::default)
    }

    /// Lock the state one algorithm keeps for `key` under `prefix`
    pub(crate) async fn lock_state(
        &self,
        prefix: &str,
        algorithm: Algorithm,
        key: &str,
    ) -> KeyGuard<'_> {
        self.lock(&format!("{prefix}:{algorithm}:{key}")).await
    }

    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // nobody else holds or waits on this mutex
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// `{prefix}:{algorithm}:{key}:{field}`
pub(crate) fn storage_key(prefix: &str, algorithm: Algorithm, key: &str, field: &str) -> String {
    format!("{prefix}:{algorithm}:{key}:{field}")
}

pub(crate) fn parse_field<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse().map_err(|_| LimiterError::CorruptState {
        key: key.to_string(),
        reason: format!("unparseable value {raw:?}"),
    })
}

pub(crate) fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Convert a non-negative span in (fractional) microseconds, to the nanosecond
pub(crate) fn micros_to_duration(micros: f64) -> Duration {
    if micros.is_finite() && micros > 0.0 {
        Duration::from_nanos((micros * 1_000.0).round() as u64)
    } else {
        Duration::ZERO
    }
}

const MAX_RETRY_NUDGES: u32 = 4;

/// Wait before a denied request can fit, in whole microseconds
///
/// `micros` is the exact wait and is rounded up to the clock's resolution.
/// `fits` replays the limiter's own arithmetic for a candidate wait, and the
/// wait grows by a microsecond while that still falls short.
pub(crate) fn retry_delay(micros: f64, fits: impl Fn(f64) -> bool) -> Duration {
    let mut wait = if micros.is_finite() && micros > 1.0 {
        micros.ceil()
    } else {
        1.0
    };
    for _ in 0..MAX_RETRY_NUDGES {
        if fits(wait) {
            break;
        }
        wait += 1.0;
    }
    Duration::from_micros(wait as u64)
}

pub(crate) fn record_decision(algorithm: Algorithm, key: &str, n: u32, result: &RateLimitResult) {
    let outcome = if result.allowed { "allowed" } else { "denied" };
    metrics::counter!(
        "tollgate_requests_total",
        "algorithm" => algorithm.as_str(),
        "outcome" => outcome
    )
    .increment(1);

    if result.allowed {
        tracing::trace!(
            key,
            %algorithm,
            cost = n,
            remaining = result.remaining,
            "Request allowed"
        );
    } else {
        tracing::debug!(
            key,
            %algorithm,
            cost = n,
            retry_after_ms = result.retry_after.as_millis() as u64,
            "Request rate limited"
        );
    }
}

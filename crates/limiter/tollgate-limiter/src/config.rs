//! Limiter configuration

use crate::error::{LimiterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Longest accepted window, one year
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// Which algorithm a limiter runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Refilling bucket that allows bursts up to its capacity
    #[default]
    TokenBucket,
    /// Counter per aligned window
    FixedWindow,
    /// Log of request timestamps over a trailing window
    SlidingWindow,
    /// Bucket draining at a constant rate
    LeakyBucket,
}

impl Algorithm {
    /// Stable lowercase name, used in storage keys and metrics labels
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limit parameters shared by every algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Requests (or tokens) allowed per window
    pub rate: u32,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Bucket capacity for token and leaky buckets (0 = `rate`)
    #[serde(default)]
    pub burst_size: u32,

    /// Algorithm to run
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Prefix for every storage key the limiter writes
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl LimiterConfig {
    /// `rate` requests per `window`, token bucket, burst equal to rate
    pub fn new(rate: u32, window: Duration) -> Self {
        Self {
            rate,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            burst_size: 0,
            algorithm: Algorithm::default(),
            key_prefix: default_key_prefix(),
        }
    }

    /// Set the bucket capacity
    pub fn with_burst(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// Pick the algorithm
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Namespace storage keys
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Window length
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub(crate) fn window_micros(&self) -> i64 {
        i64::try_from(self.window_ms)
            .unwrap_or(i64::MAX / 1_000)
            .saturating_mul(1_000)
    }

    /// Bucket capacity, defaulting to the rate
    pub fn capacity(&self) -> u32 {
        if self.burst_size == 0 {
            self.rate
        } else {
            self.burst_size
        }
    }

    /// Tokens regained (or drained) per microsecond
    pub fn refill_per_micro(&self) -> f64 {
        f64::from(self.rate) / self.window_micros() as f64
    }

    // Multiplying before dividing keeps whole-token results exact.
    pub(crate) fn tokens_for(&self, elapsed_micros: f64) -> f64 {
        elapsed_micros * f64::from(self.rate) / self.window_micros() as f64
    }

    pub(crate) fn micros_for(&self, tokens: f64) -> f64 {
        tokens * self.window_micros() as f64 / f64::from(self.rate)
    }

    /// Reject configurations no algorithm can run with
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(LimiterError::Config("rate must be greater than zero".into()));
        }
        if self.window_ms == 0 {
            return Err(LimiterError::Config("window_ms must be greater than zero".into()));
        }
        if self.window_ms > MAX_WINDOW_MS {
            return Err(LimiterError::Config(format!(
                "window_ms must be at most {MAX_WINDOW_MS}, got {}",
                self.window_ms
            )));
        }
        if self.key_prefix.contains(char::is_whitespace) {
            return Err(LimiterError::Config(format!(
                "key_prefix must not contain whitespace: {:?}",
                self.key_prefix
            )));
        }
        Ok(())
    }
}

fn default_window_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_defaults_to_rate() {
        let config = LimiterConfig::new(10, Duration::from_secs(1));
        assert_eq!(config.capacity(), 10);
        assert_eq!(config.with_burst(25).capacity(), 25);
    }

    #[test]
    fn test_refill_rate() {
        let config = LimiterConfig::new(10, Duration::from_secs(1));
        assert!((config.refill_per_micro() - 1e-5).abs() < 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(LimiterConfig::new(0, Duration::from_secs(1)).validate().is_err());
        assert!(LimiterConfig::new(1, Duration::ZERO).validate().is_err());
        assert!(LimiterConfig::new(1, Duration::from_secs(1))
            .with_key_prefix("bad prefix")
            .validate()
            .is_err());
        assert!(LimiterConfig::new(1, Duration::from_millis(1)).validate().is_ok());
        assert!(LimiterConfig::new(1, Duration::from_millis(MAX_WINDOW_MS))
            .validate()
            .is_ok());
        assert!(LimiterConfig::new(1, Duration::from_millis(MAX_WINDOW_MS + 1))
            .validate()
            .is_err());
        assert!(LimiterConfig::new(1, Duration::MAX).validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: LimiterConfig = toml::from_str(
            r#"
            rate = 100
            algorithm = "sliding_window"
            "#,
        )
        .unwrap();
        assert_eq!(config.window(), Duration::from_secs(1));
        assert_eq!(config.algorithm, Algorithm::SlidingWindow);
        assert_eq!(config.key_prefix, "ratelimit");
        assert_eq!(config.capacity(), 100);
    }
}

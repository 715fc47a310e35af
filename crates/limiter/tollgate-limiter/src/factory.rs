//! Build a limiter from configuration

use crate::algorithms::{FixedWindow, LeakyBucket, SlidingWindow, TokenBucket};
use crate::config::{Algorithm, LimiterConfig};
use crate::error::Result;
use crate::traits::RateLimiter;
use std::sync::Arc;
use tollgate_storage::clock::{system_clock, Clock};
use tollgate_storage::SortedSetStorage;

/// Build the limiter `config.algorithm` names over `storage`
pub fn build_limiter(
    config: LimiterConfig,
    storage: Arc<dyn SortedSetStorage>,
) -> Result<Arc<dyn RateLimiter>> {
    build_limiter_with_clock(config, storage, system_clock())
}

/// Like [`build_limiter`], reading time from `clock`
pub fn build_limiter_with_clock(
    config: LimiterConfig,
    storage: Arc<dyn SortedSetStorage>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimiter>> {
    tracing::debug!(
        algorithm = %config.algorithm,
        rate = config.rate,
        window_ms = config.window_ms,
        burst = config.capacity(),
        "Building rate limiter"
    );

    let limiter: Arc<dyn RateLimiter> = match config.algorithm {
        Algorithm::TokenBucket => Arc::new(TokenBucket::with_clock(storage, config, clock)?),
        Algorithm::FixedWindow => Arc::new(FixedWindow::with_clock(storage, config, clock)?),
        Algorithm::SlidingWindow => Arc::new(SlidingWindow::with_clock(storage, config, clock)?),
        Algorithm::LeakyBucket => Arc::new(LeakyBucket::with_clock(storage, config, clock)?),
    };
    Ok(limiter)
}

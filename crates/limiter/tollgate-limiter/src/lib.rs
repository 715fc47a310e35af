//! Tollgate Limiter - per-key rate limiting over pluggable storage
//!
//! Four algorithms share one [`RateLimiter`] trait:
//!
//! - [`TokenBucket`]: refills continuously, allows bursts up to capacity
//! - [`FixedWindow`]: one counter per epoch-aligned window
//! - [`SlidingWindow`]: exact log of admitted units over a trailing window
//! - [`LeakyBucket`]: drains at a constant rate, smoothing traffic
//!
//! State lives in a [`tollgate_storage`] backend, so the same limiter can run
//! in one process over memory or across many over Redis. [`LocalTokenBucket`]
//! skips storage entirely for the single-process case.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate_limiter::prelude::*;
//! use tollgate_storage::backends::MemoryStorage;
//! use tollgate_storage::MemoryConfig;
//!
//! # async fn run() -> tollgate_limiter::Result<()> {
//! let storage = Arc::new(MemoryStorage::new(MemoryConfig::default()));
//! let limiter = TokenBucket::new(storage, LimiterConfig::new(10, Duration::from_secs(1)))?;
//!
//! let info = limiter.allow_with_info("user:alice", 1).await?;
//! if !info.allowed {
//!     println!("retry in {:?}", info.retry_after);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod algorithms;
pub mod config;
pub mod error;
pub mod factory;
mod scripts;
mod state;
pub mod traits;

// Re-export commonly used types
pub use algorithms::{FixedWindow, LeakyBucket, LocalTokenBucket, SlidingWindow, TokenBucket};
pub use config::{Algorithm, LimiterConfig, MAX_WINDOW_MS};
pub use error::{LimiterError, Result};
pub use factory::{build_limiter, build_limiter_with_clock};
pub use traits::{RateLimitResult, RateLimiter};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        algorithms::{FixedWindow, LeakyBucket, LocalTokenBucket, SlidingWindow, TokenBucket},
        build_limiter,
        config::{Algorithm, LimiterConfig},
        error::{LimiterError, Result},
        traits::{RateLimitResult, RateLimiter},
    };
}

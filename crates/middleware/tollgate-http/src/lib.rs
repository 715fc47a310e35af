//! Tollgate HTTP - rate limiting for axum services
//!
//! Wrap any [`axum::Router`] with a [`RateLimitMiddleware`]: each request is
//! keyed by a [`KeyExtractor`], checked against a
//! [`RateLimiter`](tollgate_limiter::RateLimiter), and answered with
//! `X-RateLimit-*` headers. Rejected requests get `429 Too Many Requests`
//! and a `Retry-After` header.
//!
//! ```no_run
//! use axum::{routing::get, Router};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate_http::{extract, RateLimitMiddleware};
//! use tollgate_limiter::{LimiterConfig, LocalTokenBucket};
//!
//! # fn build() -> tollgate_limiter::Result<Router> {
//! let limiter = Arc::new(LocalTokenBucket::new(LimiterConfig::new(10, Duration::from_secs(1)))?);
//! let app = RateLimitMiddleware::new(limiter, extract::ip_address())
//!     .apply(Router::new().route("/", get(|| async { "hello" })));
//! # Ok(app)
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod extract;
pub mod headers;
pub mod middleware;
pub mod server;

pub use self::config::{AppConfig, ServerConfig};
pub use extract::{KeyExtractor, UserId};
pub use headers::{set_rate_limit_headers, set_retry_after_header};
pub use middleware::{default_on_limit_exceeded, FailureMode, LimitExceededHandler, RateLimitMiddleware};
pub use server::{create_router, TollgateServer};

use thiserror::Error;

/// Errors from configuring or running the server
#[derive(Error, Debug)]
pub enum HttpError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    /// The limiter could not be built
    #[error("Limiter error: {0}")]
    Limiter(#[from] tollgate_limiter::LimiterError),

    /// The storage backend could not be built
    #[error("Storage error: {0}")]
    Storage(#[from] tollgate_storage::StorageError),

    /// Binding or serving failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other server failure
    #[error("Server error: {0}")]
    Server(String),
}

/// Type alias for Results using HttpError
pub type Result<T> = std::result::Result<T, HttpError>;

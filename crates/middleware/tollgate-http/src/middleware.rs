//! Rate limiting middleware for axum routers

use crate::extract::KeyExtractor;
use crate::headers::{set_rate_limit_headers, set_retry_after_header};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_limiter::{RateLimitResult, RateLimiter};

/// Builds the response for a rejected request
///
/// Rate limit headers and `Retry-After` are added afterwards.
pub type LimitExceededHandler = Arc<dyn Fn(&RateLimitResult) -> Response + Send + Sync>;

/// What to do when the limiter itself fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Let the request through
    #[default]
    FailOpen,
    /// Answer `503 Service Unavailable`
    FailClosed,
}

/// Applies a [`RateLimiter`] to every request routed through it
pub struct RateLimitMiddleware {
    limiter: Arc<dyn RateLimiter>,
    key_extractor: KeyExtractor,
    cost: u32,
    on_limit_exceeded: LimitExceededHandler,
    failure_mode: FailureMode,
}

impl RateLimitMiddleware {
    /// Limit requests by the key `key_extractor` derives, one unit each
    pub fn new(limiter: Arc<dyn RateLimiter>, key_extractor: KeyExtractor) -> Self {
        Self {
            limiter,
            key_extractor,
            cost: 1,
            on_limit_exceeded: Arc::new(default_on_limit_exceeded),
            failure_mode: FailureMode::default(),
        }
    }

    /// Units each request consumes
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Replace the default `429` response
    pub fn with_on_limit_exceeded<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RateLimitResult) -> Response + Send + Sync + 'static,
    {
        self.on_limit_exceeded = Arc::new(handler);
        self
    }

    /// Choose how limiter failures are handled
    pub fn with_failure_mode(mut self, failure_mode: FailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Wrap every route of `router`
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(Arc::new(self), rate_limit))
    }
}

/// `429 Too Many Requests` with a JSON error body
pub fn default_on_limit_exceeded(_result: &RateLimitResult) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "rate limit exceeded",
            "message": "Too many requests. Please try again later.",
        })),
    )
        .into_response()
}

async fn rate_limit(
    State(middleware): State<Arc<RateLimitMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    let key = (middleware.key_extractor)(&request);

    match middleware.limiter.allow_with_info(&key, middleware.cost).await {
        Ok(result) if result.allowed => {
            let mut response = next.run(request).await;
            set_rate_limit_headers(response.headers_mut(), &result);
            response
        }
        Ok(result) => {
            tracing::info!(
                key = %key,
                path = %request.uri().path(),
                retry_after_secs = result.retry_after_secs(),
                "Rejected rate limited request"
            );
            let mut response = (middleware.on_limit_exceeded)(&result);
            set_rate_limit_headers(response.headers_mut(), &result);
            set_retry_after_header(response.headers_mut(), result.retry_after_secs());
            response
        }
        Err(e) => match middleware.failure_mode {
            FailureMode::FailOpen => {
                tracing::warn!(key = %key, error = %e, "Rate limiter failed, allowing request");
                next.run(request).await
            }
            FailureMode::FailClosed => {
                tracing::error!(key = %key, error = %e, "Rate limiter failed, rejecting request");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({
                        "error": "rate limiter unavailable",
                        "message": "Please try again later.",
                    })),
                )
                    .into_response()
            }
        },
    }
}

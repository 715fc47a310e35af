//! Rate limit response headers

use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use tollgate_limiter::RateLimitResult;

/// Maximum units allowed
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Units left after this request
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Unix timestamp (seconds) at which the limit is fully restored
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Set `X-RateLimit-Limit`, `X-RateLimit-Remaining` and `X-RateLimit-Reset`
pub fn set_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_at.timestamp()));
}

/// Set `Retry-After` in whole seconds
pub fn set_retry_after_header(headers: &mut HeaderMap, seconds: u64) {
    headers.insert(RETRY_AFTER, HeaderValue::from(seconds));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use std::time::Duration;

    #[test]
    fn test_headers() {
        let result = RateLimitResult {
            allowed: false,
            limit: 100,
            remaining: 0,
            retry_after: Duration::from_millis(1_500),
            reset_at: DateTime::from_timestamp(1_700_000_060, 0).unwrap(),
        };
        let mut headers = HeaderMap::new();
        set_rate_limit_headers(&mut headers, &result);
        set_retry_after_header(&mut headers, result.retry_after_secs());

        assert_eq!(headers["x-ratelimit-limit"], "100");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "1700000060");
        assert_eq!(headers["retry-after"], "2");
    }
}

//! Key extractors
//!
//! An extractor decides who a request is limited as. The built-in ones
//! produce `kind:value` keys so that keys from different extractors never
//! collide in shared storage.

use axum::extract::{ConnectInfo, Request};
use std::net::SocketAddr;
use std::sync::Arc;

/// Derives the rate limit key for a request
pub type KeyExtractor = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Key used when a request carries no identity
pub const ANONYMOUS: &str = "anonymous";

/// Authenticated user, set as a request extension by an upstream auth layer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

/// `api_key:<value>` from the given header, or `anonymous`
pub fn api_key(header: impl Into<String>) -> KeyExtractor {
    let header = header.into();
    Arc::new(move |request: &Request| {
        match request
            .headers()
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
        {
            Some(key) => format!("api_key:{key}"),
            None => ANONYMOUS.to_string(),
        }
    })
}

/// `ip:<address>` of the client
///
/// Behind a proxy the first `X-Forwarded-For` hop is the client. Otherwise the
/// peer address is read from [`ConnectInfo`], which requires serving with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn ip_address() -> KeyExtractor {
    Arc::new(|request: &Request| format!("ip:{}", client_ip(request)))
}

/// The client address as used by [`ip_address`], `unknown` if there is none
pub fn client_ip(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string())
}

/// `user:<id>` from the [`UserId`] extension, or `anonymous`
pub fn user_id() -> KeyExtractor {
    Arc::new(|request: &Request| match request.extensions().get::<UserId>() {
        Some(UserId(id)) => format!("user:{id}"),
        None => ANONYMOUS.to_string(),
    })
}

/// `endpoint:<path>`
pub fn endpoint() -> KeyExtractor {
    Arc::new(|request: &Request| format!("endpoint:{}", request.uri().path()))
}

/// Join several extractors' keys with `:`
///
/// `combine([api_key("X-API-Key"), endpoint()])` yields keys such as
/// `api_key:abc123:endpoint:/create`.
pub fn combine(extractors: impl IntoIterator<Item = KeyExtractor>) -> KeyExtractor {
    let extractors: Vec<KeyExtractor> = extractors.into_iter().collect();
    Arc::new(move |request: &Request| {
        extractors
            .iter()
            .map(|extract| extract(request))
            .collect::<Vec<_>>()
            .join(":")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(headers: &[(&str, &str)]) -> Request {
        let mut builder = Request::builder().uri("/api/create?x=1");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_api_key() {
        let extract = api_key("X-API-Key");
        assert_eq!(extract(&request(&[("x-api-key", "abc123")])), "api_key:abc123");
        assert_eq!(extract(&request(&[])), "anonymous");
        assert_eq!(extract(&request(&[("x-api-key", "")])), "anonymous");
    }

    #[test]
    fn test_ip_prefers_first_forwarded_hop() {
        let extract = ip_address();
        let req = request(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(extract(&req), "ip:203.0.113.7");
    }

    #[test]
    fn test_ip_falls_back_to_peer() {
        let extract = ip_address();
        let mut req = request(&[]);
        assert_eq!(extract(&req), "ip:unknown");

        let peer: SocketAddr = "192.0.2.10:53211".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(extract(&req), "ip:192.0.2.10");
    }

    #[test]
    fn test_user_id() {
        let extract = user_id();
        let mut req = request(&[]);
        assert_eq!(extract(&req), "anonymous");
        req.extensions_mut().insert(UserId("42".into()));
        assert_eq!(extract(&req), "user:42");
    }

    #[test]
    fn test_endpoint_ignores_query() {
        assert_eq!(endpoint()(&request(&[])), "endpoint:/api/create");
    }

    #[test]
    fn test_combine() {
        let extract = combine([api_key("X-API-Key"), endpoint()]);
        let req = request(&[("x-api-key", "abc123")]);
        assert_eq!(extract(&req), "api_key:abc123:endpoint:/api/create");
    }
}

//! `/api/hello` limited to 5 requests per 10 seconds per client IP
//!
//! Run with `cargo run -p tollgate-http --example hello_server`, then
//! `curl -i http://localhost:8080/api/hello` a few times.

use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tollgate_http::{extract, RateLimitMiddleware};
use tollgate_limiter::{LimiterConfig, TokenBucket};
use tollgate_storage::backends::MemoryStorage;
use tollgate_storage::MemoryConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let storage = Arc::new(MemoryStorage::new(MemoryConfig::default()));
    let limiter = Arc::new(TokenBucket::new(
        storage,
        LimiterConfig::new(5, Duration::from_secs(10)),
    )?);

    let app = RateLimitMiddleware::new(limiter, extract::ip_address()).apply(
        Router::new().route(
            "/api/hello",
            get(|| async { "Hello! This endpoint is rate limited.\n" }),
        ),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
    println!("Listening on http://127.0.0.1:8080/api/hello");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

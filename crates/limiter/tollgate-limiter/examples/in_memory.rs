//! Token bucket over in-memory storage: 10 requests/s with a burst of 20
//!
//! Run with `cargo run -p tollgate-limiter --example in_memory`

use std::sync::Arc;
use std::time::Duration;
use tollgate_limiter::prelude::*;
use tollgate_storage::backends::MemoryStorage;
use tollgate_storage::MemoryConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let storage = Arc::new(MemoryStorage::new(MemoryConfig::default()));
    let config = LimiterConfig::new(10, Duration::from_secs(1)).with_burst(20);
    let limiter = TokenBucket::new(storage, config)?;

    for i in 1..=30 {
        let info = limiter.allow_with_info("user:123", 1).await?;
        if info.allowed {
            println!("Request {i:2}: ALLOWED      ({} left)", info.remaining);
        } else {
            println!("Request {i:2}: RATE LIMITED (retry in {:?})", info.retry_after);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(())
}

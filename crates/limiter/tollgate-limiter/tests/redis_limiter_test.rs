//! Limiters sharing one Redis through separate connections
//!
//! Requires a running server; set `TOLLGATE_REDIS_URL` to enable them.

#![cfg(feature = "redis")]

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tollgate_limiter::prelude::*;
use tollgate_storage::backends::RedisStorage;
use tollgate_storage::{RedisConfig, SortedSetStorage};

const ALGORITHMS: [Algorithm; 4] = [
    Algorithm::TokenBucket,
    Algorithm::FixedWindow,
    Algorithm::SlidingWindow,
    Algorithm::LeakyBucket,
];

async fn connect(url: &str) -> Arc<dyn SortedSetStorage> {
    let config = RedisConfig {
        url: url.to_string(),
        key_prefix: format!("tollgate-limiter-test-{}", std::process::id()),
        ..RedisConfig::default()
    };
    Arc::new(RedisStorage::new(config).await.expect("Failed to connect to Redis"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limiters_on_separate_connections_share_one_limit() {
    let Ok(url) = std::env::var("TOLLGATE_REDIS_URL") else {
        eprintln!("TOLLGATE_REDIS_URL not set, skipping");
        return;
    };

    for algorithm in ALGORITHMS {
        // an hour-long window keeps fixed windows clear of a boundary
        let config = LimiterConfig::new(100, Duration::from_secs(3600)).with_algorithm(algorithm);
        let limiters = [
            build_limiter(config.clone(), connect(&url).await).unwrap(),
            build_limiter(config, connect(&url).await).unwrap(),
        ];
        let key = format!("user:shared:{}", uuid::Uuid::new_v4());

        let tasks = (0..150).map(|i| {
            let limiter = Arc::clone(&limiters[i % 2]);
            let key = key.clone();
            tokio::spawn(async move { limiter.allow(&key).await.unwrap() })
        });
        let allowed = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(allowed, 100, "{algorithm}");
        limiters[0].reset(&key).await.unwrap();
    }
}

//! Integration tests for memory backend

use std::sync::Arc;
use std::time::Duration;
use tollgate_storage::backends::memory::MemoryStorage;
use tollgate_storage::{
    ManualClock, MemoryConfig, SortedSetMember, SortedSetStorage, Storage, StorageBuilder,
    StorageConfig,
};

#[tokio::test]
async fn test_memory_backend_basic_operations() {
    let storage = MemoryStorage::new(MemoryConfig::default());

    assert!(storage.get("non_existent").await.unwrap().is_none());

    storage.set("key1", "value1", None).await.unwrap();
    assert_eq!(storage.get("key1").await.unwrap().as_deref(), Some("value1"));

    assert!(storage.exists("key1").await.unwrap());
    assert!(!storage.exists("key2").await.unwrap());

    storage.delete("key1").await.unwrap();
    assert!(!storage.exists("key1").await.unwrap());
}

#[tokio::test]
async fn test_builder_returns_working_backend() {
    let clock = ManualClock::new(0);
    let storage = StorageBuilder::new(StorageConfig::Memory(MemoryConfig::default()))
        .with_clock(Arc::new(clock.clone()))
        .build()
        .await
        .unwrap();

    storage
        .set("session", "abc", Some(Duration::from_secs(30)))
        .await
        .unwrap();
    storage
        .zadd("log", &[SortedSetMember::new(1.0, "a")])
        .await
        .unwrap();
    storage.expire("log", Duration::from_secs(10)).await.unwrap();

    clock.advance(Duration::from_secs(10));
    assert_eq!(storage.zcard("log").await.unwrap(), 0);
    assert!(storage.exists("session").await.unwrap());

    clock.advance(Duration::from_secs(20));
    assert!(!storage.exists("session").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_backend_concurrent_increments() {
    let storage = Arc::new(MemoryStorage::default());
    let mut handles = vec![];

    for _ in 0..10 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            for _ in 0..100 {
                storage.increment("counter").await.unwrap();
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        storage.get("counter").await.unwrap().as_deref(),
        Some("1000")
    );
}

#[tokio::test]
async fn test_memory_backend_special_characters_in_keys() {
    let storage = MemoryStorage::default();

    let test_cases = [
        ("key with spaces", "value1"),
        ("key/with/slashes", "value2"),
        ("user:alice:tokens", "value3"),
        ("ip:2001:db8::1", "value4"),
        ("", "empty key"),
    ];

    for (key, value) in test_cases {
        storage.set(key, value, None).await.unwrap();
        assert_eq!(storage.get(key).await.unwrap().as_deref(), Some(value));
    }
    assert_eq!(storage.len(), test_cases.len());
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_purges_expired_keys() {
    let clock = ManualClock::new(0);
    let storage = MemoryStorage::with_clock(
        MemoryConfig {
            cleanup_interval_ms: 100,
            ..MemoryConfig::default()
        },
        Arc::new(clock.clone()),
    );

    storage
        .set("short", "lived", Some(Duration::from_millis(50)))
        .await
        .unwrap();
    clock.advance(Duration::from_millis(60));

    // let the sweeper tick
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(storage.sweep_expired(), 0);
    assert!(storage.is_empty());

    storage.close().await.unwrap();
}

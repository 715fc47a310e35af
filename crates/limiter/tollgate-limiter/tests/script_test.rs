//! Limiters over a backend with scripting hand every decision to a script
//!
//! The backend here answers `eval` from a queue of canned replies and fails
//! every other call, so a limiter that strays off the script path errors.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tollgate_limiter::prelude::*;
use tollgate_storage::{
    ManualClock, Result as StorageResult, ScriptStorage, SortedSetMember, SortedSetStorage,
    Storage, StorageError,
};

// a quarter past a whole second
const NOW: i64 = 1_700_000_040_250_000;

#[derive(Debug, Clone)]
struct Eval {
    keys: Vec<String>,
    args: Vec<String>,
}

#[derive(Default)]
struct ScriptOnly {
    replies: Mutex<VecDeque<Vec<String>>>,
    calls: Mutex<Vec<Eval>>,
}

impl ScriptOnly {
    fn replying(replies: &[&[&str]]) -> Arc<Self> {
        let store = Self::default();
        for reply in replies {
            store
                .replies
                .lock()
                .push_back(reply.iter().map(|f| f.to_string()).collect());
        }
        Arc::new(store)
    }

    fn calls(&self) -> Vec<Eval> {
        self.calls.lock().clone()
    }
}

fn refused<T>() -> StorageResult<T> {
    Err(StorageError::Unsupported("script only".into()))
}

#[async_trait]
impl Storage for ScriptOnly {
    async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        refused()
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> StorageResult<()> {
        refused()
    }

    async fn increment_by(&self, _key: &str, _n: i64) -> StorageResult<i64> {
        refused()
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        refused()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StorageResult<()> {
        refused()
    }

    async fn get_multiple(&self, _keys: &[&str]) -> StorageResult<HashMap<String, String>> {
        refused()
    }

    async fn set_multiple(
        &self,
        _items: &[(&str, &str)],
        _ttl: Option<Duration>,
    ) -> StorageResult<()> {
        refused()
    }

    fn scripting(&self) -> Option<&dyn ScriptStorage> {
        Some(self)
    }
}

#[async_trait]
impl SortedSetStorage for ScriptOnly {
    async fn zadd(&self, _key: &str, _members: &[SortedSetMember]) -> StorageResult<()> {
        refused()
    }

    async fn zrem_range_by_score(&self, _key: &str, _min: f64, _max: f64) -> StorageResult<u64> {
        refused()
    }

    async fn zcount(&self, _key: &str, _min: f64, _max: f64) -> StorageResult<u64> {
        refused()
    }

    async fn zcard(&self, _key: &str) -> StorageResult<u64> {
        refused()
    }

    async fn zrange_by_score(
        &self,
        _key: &str,
        _min: f64,
        _max: f64,
    ) -> StorageResult<Vec<SortedSetMember>> {
        refused()
    }
}

#[async_trait]
impl ScriptStorage for ScriptOnly {
    async fn eval(&self, _script: &str, keys: &[&str], args: &[&str]) -> StorageResult<Vec<String>> {
        self.calls.lock().push(Eval {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });
        self.replies
            .lock()
            .pop_front()
            .ok_or_else(|| StorageError::Other("no reply queued".into()))
    }
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NOW))
}

#[tokio::test]
async fn test_token_bucket_decides_in_script() {
    let store = ScriptOnly::replying(&[&["1", "7"], &["0", "0.5"]]);
    let config = LimiterConfig::new(10, Duration::from_secs(1));
    let limiter = TokenBucket::with_clock(Arc::clone(&store), config, clock()).unwrap();

    let allowed = limiter.allow_with_info("user:alice", 3).await.unwrap();
    assert!(allowed.allowed);
    assert_eq!(allowed.remaining, 7);

    let denied = limiter.allow_with_info("user:alice", 1).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    // half a token short at 10/s
    assert_eq!(denied.retry_after, Duration::from_millis(50));

    let calls = store.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0].keys,
        [
            "ratelimit:token_bucket:user:alice:tokens",
            "ratelimit:token_bucket:user:alice:last_refill"
        ]
    );
    assert_eq!(
        calls[0].args,
        [NOW.to_string().as_str(), "3", "10", "10", "1000000"]
    );
}

#[tokio::test]
async fn test_leaky_bucket_decides_in_script() {
    let store = ScriptOnly::replying(&[&["1", "3"]]);
    let config = LimiterConfig::new(2, Duration::from_secs(1))
        .with_burst(4)
        .with_algorithm(Algorithm::LeakyBucket);
    let limiter = LeakyBucket::with_clock(Arc::clone(&store), config, clock()).unwrap();

    let info = limiter.allow_with_info("k", 1).await.unwrap();
    assert!(info.allowed);
    assert_eq!(info.remaining, 1);
    assert_eq!(info.limit, 4);

    let calls = store.calls();
    assert_eq!(calls[0].keys[0], "ratelimit:leaky_bucket:k:level");
    assert_eq!(calls[0].args[1..], ["1", "4", "2", "1000000"]);
}

#[tokio::test]
async fn test_fixed_window_decides_in_script() {
    let store = ScriptOnly::replying(&[&["1", "3"], &["0", "5"]]);
    let config = LimiterConfig::new(5, Duration::from_secs(1)).with_algorithm(Algorithm::FixedWindow);
    let limiter = FixedWindow::with_clock(Arc::clone(&store), config, clock()).unwrap();

    let allowed = limiter.allow_with_info("k", 3).await.unwrap();
    assert_eq!(allowed.remaining, 2);

    let denied = limiter.allow_with_info("k", 1).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Duration::from_millis(750));

    let calls = store.calls();
    assert_eq!(calls[0].keys, ["ratelimit:fixed_window:k:1700000040000"]);
    // the counter lives until the window ends
    assert_eq!(calls[0].args, ["3", "5", "750"]);
}

#[tokio::test]
async fn test_sliding_window_decides_in_script() {
    let older = (NOW - 400_000).to_string();
    let store = ScriptOnly::replying(&[&["1", older.as_str()], &["0", older.as_str(), older.as_str()]]);
    let config =
        LimiterConfig::new(3, Duration::from_secs(1)).with_algorithm(Algorithm::SlidingWindow);
    let limiter = SlidingWindow::with_clock(Arc::clone(&store), config, clock()).unwrap();

    let allowed = limiter.allow_with_info("k", 2).await.unwrap();
    assert!(allowed.allowed);
    assert_eq!(allowed.remaining, 0);

    let denied = limiter.allow_with_info("k", 2).await.unwrap();
    assert!(!denied.allowed);
    // the older entry leaves the window 600ms from now
    assert_eq!(denied.retry_after, Duration::from_millis(600));

    let calls = store.calls();
    assert_eq!(calls[0].keys, ["ratelimit:sliding_window:k:log"]);
    assert_eq!(calls[0].args[1..5], ["2", "3", "1000000", "1000"]);
    // one unique member per unit
    let members = &calls[0].args[5..];
    assert_eq!(members.len(), 2);
    assert!(members.iter().all(|m| m.starts_with(&NOW.to_string())));
    assert_ne!(members[0], members[1]);
}

#[tokio::test]
async fn test_oversized_sliding_request_sends_no_members() {
    let store = ScriptOnly::replying(&[&["0"]]);
    let config =
        LimiterConfig::new(3, Duration::from_secs(1)).with_algorithm(Algorithm::SlidingWindow);
    let limiter = SlidingWindow::with_clock(Arc::clone(&store), config, clock()).unwrap();

    let info = limiter.allow_with_info("k", 4).await.unwrap();
    assert!(!info.allowed);
    assert_eq!(info.retry_after, Duration::from_secs(1));
    assert_eq!(store.calls()[0].args.len(), 5);
}

#[tokio::test]
async fn test_malformed_reply_is_corrupt_state() {
    let store = ScriptOnly::replying(&[&["1"]]);
    let limiter =
        TokenBucket::with_clock(store, LimiterConfig::new(10, Duration::from_secs(1)), clock())
            .unwrap();

    assert!(matches!(
        limiter.allow("k").await,
        Err(LimiterError::CorruptState { .. })
    ));
}

//! In-memory storage backend
//!
//! Suitable for tests and single-process deployments. State is not shared
//! between processes, so a fleet of servers each enforces its own limits.

use crate::clock::{duration_micros, system_clock, Clock};
use crate::config::MemoryConfig;
use crate::error::{Result, StorageError};
use crate::traits::{SortedSetMember, SortedSetStorage, Storage};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct State {
    data: HashMap<String, String>,
    sorted_sets: HashMap<String, Vec<SortedSetMember>>,
    // absolute deadline in microseconds
    expiry: HashMap<String, i64>,
}

impl State {
    fn is_expired(&self, key: &str, now: i64) -> bool {
        self.expiry.get(key).is_some_and(|deadline| now >= *deadline)
    }

    fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key) || self.sorted_sets.contains_key(key)
    }

    fn remove(&mut self, key: &str) {
        self.data.remove(key);
        self.sorted_sets.remove(key);
        self.expiry.remove(key);
    }

    fn purge_if_expired(&mut self, key: &str, now: i64) {
        if self.is_expired(key, now) {
            self.remove(key);
        }
    }

    fn key_count(&self) -> usize {
        self.data.len() + self.sorted_sets.len()
    }

    fn sweep(&mut self, now: i64) -> usize {
        let expired: Vec<String> = self
            .expiry
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn live_set(&self, key: &str, now: i64) -> Option<&Vec<SortedSetMember>> {
        if self.is_expired(key, now) {
            return None;
        }
        self.sorted_sets.get(key)
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<State>,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
}

impl Shared {
    fn now(&self) -> i64 {
        self.clock.now_micros()
    }

    fn ensure_capacity(&self, state: &State, new_keys: usize) -> Result<()> {
        if self.config.max_keys > 0 && state.key_count() + new_keys > self.config.max_keys {
            return Err(StorageError::StorageFull);
        }
        Ok(())
    }

    fn sweep(&self) -> usize {
        let mut state = self.state.write();
        let purged = state.sweep(self.now());
        metrics::gauge!("tollgate_storage_keys").set(state.key_count() as f64);
        purged
    }
}

/// In-memory storage implementation
#[derive(Clone, Debug)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance reading the system clock
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a memory storage instance with a custom clock
    ///
    /// When called inside a tokio runtime, a sweeper task purges expired
    /// keys every `cleanup_interval_ms`. Outside a runtime expiry is still
    /// honoured lazily on every access.
    pub fn with_clock(config: MemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(State {
                data: HashMap::with_capacity(config.initial_capacity),
                ..State::default()
            }),
            clock,
            config,
        });
        let sweeper = spawn_sweeper(&shared);

        Self {
            shared,
            sweeper: Arc::new(Mutex::new(sweeper)),
        }
    }

    /// Number of live keys, counting values and sorted sets
    pub fn len(&self) -> usize {
        let state = self.shared.state.read();
        let now = self.shared.now();
        state
            .data
            .keys()
            .chain(state.sorted_sets.keys())
            .filter(|key| !state.is_expired(key, now))
            .count()
    }

    /// Whether the store holds no live keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Purge expired keys now, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

fn spawn_sweeper(shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
    let handle = tokio::runtime::Handle::try_current().ok()?;
    let interval = Duration::from_millis(shared.config.cleanup_interval_ms.max(1));
    let weak: Weak<Shared> = Arc::downgrade(shared);

    Some(handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(shared) = weak.upgrade() else {
                break;
            };
            let purged = shared.sweep();
            if purged > 0 {
                tracing::trace!(purged, "Swept expired keys");
            }
        }
    }))
}

fn deadline(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(duration_micros(ttl))
}

fn parse_counter(key: &str, raw: &str) -> Result<i64> {
    raw.parse::<i64>().map_err(|_| {
        StorageError::InvalidValue(format!("value at {key} is not an integer: {raw:?}"))
    })
}

fn wrong_type(key: &str) -> StorageError {
    StorageError::InvalidValue(format!("WRONGTYPE operation against {key}"))
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.shared.state.read();
        if state.is_expired(key, self.shared.now()) {
            return Ok(None);
        }
        Ok(state.data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let now = self.shared.now();
        let mut state = self.shared.state.write();
        state.purge_if_expired(key, now);

        if !state.contains(key) {
            self.shared.ensure_capacity(&state, 1)?;
        }

        // SET replaces whatever type was stored before
        state.sorted_sets.remove(key);
        state.data.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => {
                state.expiry.insert(key.to_string(), deadline(now, ttl));
            }
            None => {
                state.expiry.remove(key);
            }
        }
        Ok(())
    }

    async fn increment_by(&self, key: &str, n: i64) -> Result<i64> {
        let now = self.shared.now();
        let mut state = self.shared.state.write();
        state.purge_if_expired(key, now);

        if state.sorted_sets.contains_key(key) {
            return Err(wrong_type(key));
        }

        let current = match state.data.get(key) {
            Some(raw) => parse_counter(key, raw)?,
            None => {
                self.shared.ensure_capacity(&state, 1)?;
                0
            }
        };
        let next = current
            .checked_add(n)
            .ok_or_else(|| StorageError::InvalidValue(format!("increment overflow at {key}")))?;

        // an existing expiry is kept
        state.data.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.shared.state.write().remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = self.shared.now();
        let mut state = self.shared.state.write();
        state.purge_if_expired(key, now);

        if !state.contains(key) {
            return Err(StorageError::NotFound(key.to_string()));
        }
        state.expiry.insert(key.to_string(), deadline(now, ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let state = self.shared.state.read();
        Ok(!state.is_expired(key, self.shared.now()) && state.contains(key))
    }

    async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let state = self.shared.state.read();
        let now = self.shared.now();
        Ok(keys
            .iter()
            .filter(|key| !state.is_expired(key, now))
            .filter_map(|key| state.data.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect())
    }

    async fn set_multiple(&self, items: &[(&str, &str)], ttl: Option<Duration>) -> Result<()> {
        let now = self.shared.now();
        let mut state = self.shared.state.write();
        for (key, _) in items {
            state.purge_if_expired(key, now);
        }

        let mut fresh: Vec<&str> = items
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| !state.contains(key))
            .collect();
        fresh.sort_unstable();
        fresh.dedup();
        self.shared.ensure_capacity(&state, fresh.len())?;

        for (key, value) in items {
            state.sorted_sets.remove(*key);
            state.data.insert(key.to_string(), value.to_string());
            match ttl {
                Some(ttl) => {
                    state.expiry.insert(key.to_string(), deadline(now, ttl));
                }
                None => {
                    state.expiry.remove(*key);
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}

#[async_trait]
impl SortedSetStorage for MemoryStorage {
    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<()> {
        if members.iter().any(|m| m.score.is_nan()) {
            return Err(StorageError::InvalidValue("sorted set score is NaN".into()));
        }

        let now = self.shared.now();
        let mut state = self.shared.state.write();
        state.purge_if_expired(key, now);

        if state.data.contains_key(key) {
            return Err(wrong_type(key));
        }
        if !state.sorted_sets.contains_key(key) {
            self.shared.ensure_capacity(&state, 1)?;
        }

        // the last score given for a member wins
        let mut incoming: HashMap<&str, f64> = HashMap::with_capacity(members.len());
        for member in members {
            incoming.insert(member.member.as_str(), member.score);
        }

        let set = state.sorted_sets.entry(key.to_string()).or_default();
        set.retain(|existing| !incoming.contains_key(existing.member.as_str()));
        set.extend(
            incoming
                .into_iter()
                .map(|(member, score)| SortedSetMember::new(score, member)),
        );
        set.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.member.cmp(&b.member))
        });
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let now = self.shared.now();
        let mut state = self.shared.state.write();
        state.purge_if_expired(key, now);

        let Some(set) = state.sorted_sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|m| m.score < min || m.score > max);
        let removed = before - set.len();

        // empty sets cease to exist
        if set.is_empty() {
            state.remove(key);
        }
        Ok(removed as u64)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let state = self.shared.state.read();
        Ok(state
            .live_set(key, self.shared.now())
            .map_or(0, |set| set.iter().filter(|m| m.score >= min && m.score <= max).count())
            as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let state = self.shared.state.read();
        Ok(state.live_set(key, self.shared.now()).map_or(0, Vec::len) as u64)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<SortedSetMember>> {
        let state = self.shared.state.read();
        Ok(state
            .live_set(key, self.shared.now())
            .map(|set| {
                set.iter()
                    .filter(|m| m.score >= min && m.score <= max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

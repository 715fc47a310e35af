//! Redis storage backend
//!
//! Every command goes through a [`ConnectionManager`], which reconnects on
//! its own after a dropped connection. Keys are namespaced with the
//! configured prefix. Lua scripts run through `EVALSHA`, loading the script
//! on first use.

use crate::config::RedisConfig;
use crate::error::{Result, StorageError};
use crate::traits::{ScriptStorage, SortedSetMember, SortedSetStorage, Storage};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;

/// Redis-backed storage
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStorage")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisStorage {
    /// Connect and verify the server answers `PING`
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let timeout = Duration::from_secs(config.connect_timeout_secs);

        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StorageError::Timeout)??;

        let pong: String = tokio::time::timeout(timeout, redis::cmd("PING").query_async(&mut conn))
            .await
            .map_err(|_| StorageError::Timeout)??;
        tracing::debug!(url = %config.url, %pong, "Connected to Redis");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix,
        })
    }

    fn key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by the server
    u64::try_from(ttl.as_micros().div_ceil(1_000))
        .unwrap_or(u64::MAX)
        .max(1)
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn increment_by(&self, key: &str, n: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCRBY")
            .arg(self.key(key))
            .arg(n)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let applied: i64 = redis::cmd("PEXPIRE")
            .arg(self.key(key))
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        if applied == 0 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(count > 0)
    }

    async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let namespaced: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&namespaced)
            .query_async(&mut conn)
            .await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect())
    }

    async fn set_multiple(&self, items: &[(&str, &str)], ttl: Option<Duration>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in items {
            let cmd = pipe.cmd("SET").arg(self.key(key)).arg(*value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    fn scripting(&self) -> Option<&dyn ScriptStorage> {
        Some(self)
    }
}

#[async_trait]
impl ScriptStorage for RedisStorage {
    async fn eval(&self, script: &str, keys: &[&str], args: &[&str]) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(script);
        let mut invocation = script.prepare_invoke();
        for key in keys {
            invocation.key(self.key(key));
        }
        for arg in args {
            invocation.arg(*arg);
        }
        let reply: Vec<String> = invocation.invoke_async(&mut conn).await?;
        Ok(reply)
    }
}

#[async_trait]
impl SortedSetStorage for RedisStorage {
    async fn zadd(&self, key: &str, members: &[SortedSetMember]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("ZADD");
        cmd.arg(self.key(key));
        for m in members {
            cmd.arg(m.score).arg(&m.member);
        }
        let _: i64 = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(self.key(key))
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCOUNT")
            .arg(self.key(key))
            .arg(score_bound(min))
            .arg(score_bound(max))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("ZCARD")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<SortedSetMember>> {
        let mut conn = self.conn.clone();
        let pairs: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key(key))
            .arg(score_bound(min))
            .arg(score_bound(max))
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await?;
        Ok(pairs
            .into_iter()
            .map(|(member, score)| SortedSetMember { score, member })
            .collect())
    }
}

fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis-backed [`SharedStore`].
//!
//! Every mutation is a Lua script, so Redis runs it as one atomic
//! transaction. Threshold checks for the segmented LRU happen inside the
//! script that acts on them: two instances racing on the same partition can
//! never both demote (or both delete) on the strength of one stale read.
//!
//! Weights live in hashes as decimal strings. Counters are adjusted by the
//! exact delta of each transaction:
//!
//! ```text
//! put (update)      total += new - old
//! promote           probation -= old, protected += new, total += new - old
//! demote            protected -= w,   probation += w
//! delete            region -= w,      total -= w
//! ```

use std::future::Future;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult, Script};
use tracing::{debug, instrument};

use super::traits::{LruKeys, SharedStore, SlruKeys};
use crate::index::IndexError;
use crate::resilience::retry::{retry, RetryConfig};

/// Lua prelude: render a counter delta without exponent notation.
const INT: &str = "local function int(n) return string.format('%.0f', n) end\n";

// KEYS: lru, values, total | ARGV: key, weight, score
const LRU_PUT: &str = r#"
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
local old = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
local delta = tonumber(ARGV[2])
if old then delta = delta - tonumber(old) end
redis.call('INCRBY', KEYS[3], int(delta))
if old then return tonumber(old) end
return false
"#;

// KEYS: lru, values | ARGV: key, score
const LRU_TOUCH: &str = r#"
local w = redis.call('HGET', KEYS[2], ARGV[1])
if not w then return false end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return tonumber(w)
"#;

// KEYS: lru, values, total | ARGV: key
const LRU_REMOVE: &str = r#"
local w = redis.call('HGET', KEYS[2], ARGV[1])
if not w then return false end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('INCRBY', KEYS[3], int(-tonumber(w)))
return tonumber(w)
"#;

// KEYS: lru, values, total
const LRU_POP_ELDEST: &str = r#"
local first = redis.call('ZRANGE', KEYS[1], 0, 0)
if #first == 0 then return false end
local k = first[1]
redis.call('ZREM', KEYS[1], k)
local w = tonumber(redis.call('HGET', KEYS[2], k) or '0')
redis.call('HDEL', KEYS[2], k)
redis.call('INCRBY', KEYS[3], int(-w))
return {k, w}
"#;

// SLRU scripts all take the same seven KEYS:
//   1 protected_lru  2 protected_values  3 protected_weight
//   4 probation_lru  5 probation_values  6 probation_weight  7 total

// ARGV: key, weight, score
const SLRU_PUT: &str = r#"
local k, v, s = ARGV[1], tonumber(ARGV[2]), ARGV[3]
local old = redis.call('HGET', KEYS[2], k)
if old then
  old = tonumber(old)
  redis.call('ZADD', KEYS[1], s, k)
  redis.call('HSET', KEYS[2], k, ARGV[2])
  redis.call('INCRBY', KEYS[3], int(v - old))
  redis.call('INCRBY', KEYS[7], int(v - old))
  return old
end
old = redis.call('HGET', KEYS[5], k)
if old then
  old = tonumber(old)
  redis.call('ZREM', KEYS[4], k)
  redis.call('HDEL', KEYS[5], k)
  redis.call('INCRBY', KEYS[6], int(-old))
  redis.call('ZADD', KEYS[1], s, k)
  redis.call('HSET', KEYS[2], k, ARGV[2])
  redis.call('INCRBY', KEYS[3], int(v))
  redis.call('INCRBY', KEYS[7], int(v - old))
  return old
end
redis.call('ZADD', KEYS[4], s, k)
redis.call('HSET', KEYS[5], k, ARGV[2])
redis.call('INCRBY', KEYS[6], int(v))
redis.call('INCRBY', KEYS[7], int(v))
return false
"#;

// ARGV: key, score
const SLRU_TOUCH: &str = r#"
local k, s = ARGV[1], ARGV[2]
local w = redis.call('HGET', KEYS[2], k)
if w then
  redis.call('ZADD', KEYS[1], s, k)
  return tonumber(w)
end
w = redis.call('HGET', KEYS[5], k)
if not w then return false end
redis.call('ZREM', KEYS[4], k)
redis.call('HDEL', KEYS[5], k)
redis.call('INCRBY', KEYS[6], int(-tonumber(w)))
redis.call('ZADD', KEYS[1], s, k)
redis.call('HSET', KEYS[2], k, w)
redis.call('INCRBY', KEYS[3], int(tonumber(w)))
return tonumber(w)
"#;

// ARGV: key
const SLRU_REMOVE: &str = r#"
local k = ARGV[1]
local w = redis.call('HGET', KEYS[2], k)
if w then
  redis.call('ZREM', KEYS[1], k)
  redis.call('HDEL', KEYS[2], k)
  redis.call('INCRBY', KEYS[3], int(-tonumber(w)))
  redis.call('INCRBY', KEYS[7], int(-tonumber(w)))
  return tonumber(w)
end
w = redis.call('HGET', KEYS[5], k)
if not w then return false end
redis.call('ZREM', KEYS[4], k)
redis.call('HDEL', KEYS[5], k)
redis.call('INCRBY', KEYS[6], int(-tonumber(w)))
redis.call('INCRBY', KEYS[7], int(-tonumber(w)))
return tonumber(w)
"#;

// ARGV: protected_max, score
const SLRU_DEMOTE: &str = r#"
local current = tonumber(redis.call('GET', KEYS[3]) or '0')
if current <= tonumber(ARGV[1]) then return false end
local first = redis.call('ZRANGE', KEYS[1], 0, 0)
if #first == 0 then return false end
local k = first[1]
local w = tonumber(redis.call('HGET', KEYS[2], k) or '0')
redis.call('ZREM', KEYS[1], k)
redis.call('HDEL', KEYS[2], k)
redis.call('INCRBY', KEYS[3], int(-w))
redis.call('ZADD', KEYS[4], ARGV[2], k)
redis.call('HSET', KEYS[5], k, int(w))
redis.call('INCRBY', KEYS[6], int(w))
return {k, w}
"#;

// ARGV: probation_max
const SLRU_POP_PROBATION: &str = r#"
local current = tonumber(redis.call('GET', KEYS[6]) or '0')
if current <= tonumber(ARGV[1]) then return false end
local first = redis.call('ZRANGE', KEYS[4], 0, 0)
if #first == 0 then return false end
local k = first[1]
local w = tonumber(redis.call('HGET', KEYS[5], k) or '0')
redis.call('ZREM', KEYS[4], k)
redis.call('HDEL', KEYS[5], k)
redis.call('INCRBY', KEYS[6], int(-w))
redis.call('INCRBY', KEYS[7], int(-w))
return {k, w}
"#;

fn script(body: &str) -> Script {
    Script::new(&format!("{}{}", INT, body))
}

struct Scripts {
    lru_put: Script,
    lru_touch: Script,
    lru_remove: Script,
    lru_pop_eldest: Script,
    slru_put: Script,
    slru_touch: Script,
    slru_remove: Script,
    slru_demote: Script,
    slru_pop_probation: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            lru_put: script(LRU_PUT),
            lru_touch: script(LRU_TOUCH),
            lru_remove: script(LRU_REMOVE),
            lru_pop_eldest: script(LRU_POP_ELDEST),
            slru_put: script(SLRU_PUT),
            slru_touch: script(SLRU_TOUCH),
            slru_remove: script(SLRU_REMOVE),
            slru_demote: script(SLRU_DEMOTE),
            slru_pop_probation: script(SLRU_POP_PROBATION),
        }
    }
}

fn slru_invocation<'a>(script: &'a Script, keys: &SlruKeys) -> redis::ScriptInvocation<'a> {
    let mut invocation = script.prepare_invoke();
    invocation
        .key(&keys.protected_lru)
        .key(&keys.protected_values)
        .key(&keys.protected_weight)
        .key(&keys.probation_lru)
        .key(&keys.probation_values)
        .key(&keys.probation_weight)
        .key(&keys.total_weight);
    invocation
}

fn store_error(operation: &str, e: redis::RedisError) -> IndexError {
    IndexError::Store(format!("Failed to {}: {}", operation, e))
}

pub struct RedisIndexStore {
    connection: ConnectionManager,
    scripts: Scripts,
}

impl RedisIndexStore {
    /// Connect with the startup retry preset: a bad URL or unreachable
    /// server fails within seconds instead of hanging.
    pub async fn connect(url: &str) -> Result<Self, IndexError> {
        let client = Client::open(url).map_err(|e| store_error("open redis client", e))?;

        let connection = retry("redis_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await
        .map_err(|e: redis::RedisError| store_error("connect to redis", e))?;

        debug!(url = %url, "Connected shared index store");
        Ok(Self::with_connection(connection))
    }

    /// Wrap an existing connection (shared with other components).
    pub fn with_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            scripts: Scripts::load(),
        }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Read-only queries are idempotent, so they retry with the query preset.
    /// Scripts never retry: a timed-out script may already have committed.
    async fn read<T, F, Fut>(&self, operation: &str, mut query: F) -> Result<T, IndexError>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let connection = self.connection.clone();
        retry(operation, &RetryConfig::query(), || query(connection.clone()))
            .await
            .map_err(|e| store_error(operation, e))
    }
}

#[async_trait]
impl SharedStore for RedisIndexStore {
    #[instrument(skip(self, keys), fields(zset = %keys.lru))]
    async fn lru_put(&self, keys: &LruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let old: Option<u64> = self
            .scripts
            .lru_put
            .key(&keys.lru)
            .key(&keys.values)
            .key(&keys.total_weight)
            .arg(key)
            .arg(weight)
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run lru put", e))?;
        Ok(old)
    }

    async fn lru_touch(&self, keys: &LruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let weight: Option<u64> = self
            .scripts
            .lru_touch
            .key(&keys.lru)
            .key(&keys.values)
            .arg(key)
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run lru touch", e))?;
        Ok(weight)
    }

    async fn lru_remove(&self, keys: &LruKeys, key: &str) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let weight: Option<u64> = self
            .scripts
            .lru_remove
            .key(&keys.lru)
            .key(&keys.values)
            .key(&keys.total_weight)
            .arg(key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run lru remove", e))?;
        Ok(weight)
    }

    #[instrument(skip(self, keys), fields(zset = %keys.lru))]
    async fn lru_pop_eldest(&self, keys: &LruKeys) -> Result<Option<(String, u64)>, IndexError> {
        let mut conn = self.connection.clone();
        let popped: Option<(String, u64)> = self
            .scripts
            .lru_pop_eldest
            .key(&keys.lru)
            .key(&keys.values)
            .key(&keys.total_weight)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run lru pop eldest", e))?;
        Ok(popped)
    }

    #[instrument(skip(self, keys), fields(zset = %keys.probation_lru))]
    async fn slru_put(&self, keys: &SlruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let mut invocation = slru_invocation(&self.scripts.slru_put, keys);
        invocation.arg(key).arg(weight).arg(score);
        let old: Option<u64> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run slru put", e))?;
        Ok(old)
    }

    async fn slru_touch(&self, keys: &SlruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let mut invocation = slru_invocation(&self.scripts.slru_touch, keys);
        invocation.arg(key).arg(score);
        let weight: Option<u64> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run slru touch", e))?;
        Ok(weight)
    }

    async fn slru_remove(&self, keys: &SlruKeys, key: &str) -> Result<Option<u64>, IndexError> {
        let mut conn = self.connection.clone();
        let mut invocation = slru_invocation(&self.scripts.slru_remove, keys);
        invocation.arg(key);
        let weight: Option<u64> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run slru remove", e))?;
        Ok(weight)
    }

    #[instrument(skip(self, keys), fields(zset = %keys.protected_lru))]
    async fn slru_demote_eldest(
        &self,
        keys: &SlruKeys,
        protected_max: i64,
        score: f64,
    ) -> Result<Option<(String, u64)>, IndexError> {
        let mut conn = self.connection.clone();
        let mut invocation = slru_invocation(&self.scripts.slru_demote, keys);
        invocation.arg(protected_max).arg(score);
        let demoted: Option<(String, u64)> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run slru demote", e))?;
        Ok(demoted)
    }

    #[instrument(skip(self, keys), fields(zset = %keys.probation_lru))]
    async fn slru_pop_probation_eldest(
        &self,
        keys: &SlruKeys,
        probation_max: i64,
    ) -> Result<Option<(String, u64)>, IndexError> {
        let mut conn = self.connection.clone();
        let mut invocation = slru_invocation(&self.scripts.slru_pop_probation, keys);
        invocation.arg(probation_max);
        let popped: Option<(String, u64)> = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error("run slru pop probation", e))?;
        Ok(popped)
    }

    async fn read_counter(&self, key: &str) -> Result<i64, IndexError> {
        let raw: Option<String> = self
            .read("read counter", |mut conn| {
                let key = key.to_string();
                async move { redis::cmd("GET").arg(&key).query_async(&mut conn).await }
            })
            .await?;

        match raw {
            None => Ok(0),
            Some(value) => value.trim().parse::<i64>().map_err(|_| IndexError::CorruptValue {
                key: key.to_string(),
                value,
            }),
        }
    }

    async fn hash_contains(&self, hash: &str, field: &str) -> Result<bool, IndexError> {
        self.read("check hash field", |mut conn| {
            let (hash, field) = (hash.to_string(), field.to_string());
            async move { redis::cmd("HEXISTS").arg(&hash).arg(&field).query_async(&mut conn).await }
        })
        .await
    }

    async fn hash_len(&self, hash: &str) -> Result<u64, IndexError> {
        self.read("read hash length", |mut conn| {
            let hash = hash.to_string();
            async move { redis::cmd("HLEN").arg(&hash).query_async(&mut conn).await }
        })
        .await
    }

    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>, IndexError> {
        let mut conn = self.connection.clone();
        let mut fields = Vec::new();
        let mut cursor = 0u64;

        // HSCAN instead of HGETALL to avoid blocking Redis on large partitions
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("HSCAN")
                .arg(hash)
                .arg(cursor)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await
                .map_err(|e| store_error("scan hash fields", e))?;

            // Replies alternate field, value
            fields.extend(batch.into_iter().step_by(2));
            cursor = next;

            if cursor == 0 {
                break;
            }
        }

        // HSCAN may return a field more than once across iterations
        fields.sort_unstable();
        fields.dedup();
        Ok(fields)
    }

    async fn zset_first(&self, zset: &str) -> Result<Option<String>, IndexError> {
        let first: Vec<String> = self
            .read("read sorted set head", |mut conn| {
                let zset = zset.to_string();
                async move { redis::cmd("ZRANGE").arg(&zset).arg(0).arg(0).query_async(&mut conn).await }
            })
            .await?;
        Ok(first.into_iter().next())
    }
}

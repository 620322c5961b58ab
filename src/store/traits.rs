// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;

use crate::index::IndexError;

/// Affinity token for a partition: a Redis Cluster hash tag, so every
/// collection of the partition lands on the same slot.
pub fn affinity_token(prefix: &str, partition: &str) -> String {
    format!("{}{{{}}}", prefix, partition)
}

/// Collections of a single-region LRU partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LruKeys {
    /// Sorted set, member = key, score = recency.
    pub lru: String,
    /// Hash, key → weight.
    pub values: String,
    /// Integer counter.
    pub total_weight: String,
}

impl LruKeys {
    pub fn new(token: &str) -> Self {
        Self {
            lru: format!("{}:lru", token),
            values: format!("{}:values", token),
            total_weight: format!("{}:total_weight", token),
        }
    }
}

/// Collections of a segmented-LRU partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlruKeys {
    pub protected_lru: String,
    pub protected_values: String,
    pub protected_weight: String,
    pub probation_lru: String,
    pub probation_values: String,
    pub probation_weight: String,
    pub total_weight: String,
}

impl SlruKeys {
    pub fn new(token: &str) -> Self {
        Self {
            protected_lru: format!("{}:slru:protected_lru", token),
            protected_values: format!("{}:slru:protected_values", token),
            protected_weight: format!("{}:slru:total_weight_protected", token),
            probation_lru: format!("{}:slru:probation_lru", token),
            probation_values: format!("{}:slru:probation_values", token),
            probation_weight: format!("{}:slru:total_weight_probation", token),
            total_weight: format!("{}:slru:total_weight", token),
        }
    }
}

/// Shared state store for cache indices.
///
/// Every `lru_*` / `slru_*` method is one atomic transaction on the store
/// side: concurrent callers on any number of instances observe them in a
/// single linear order. They are the only way partition collections are
/// mutated. The remaining methods are read-only.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Upsert recency and weight; returns the previous weight.
    async fn lru_put(&self, keys: &LruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError>;

    /// Refresh recency if present; returns the weight.
    async fn lru_touch(&self, keys: &LruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError>;

    async fn lru_remove(&self, keys: &LruKeys, key: &str) -> Result<Option<u64>, IndexError>;

    /// Pop the lowest-scored entry and delete it.
    async fn lru_pop_eldest(&self, keys: &LruKeys) -> Result<Option<(String, u64)>, IndexError>;

    /// Protected hit: update in place. Probation hit: promote. Otherwise:
    /// insert into probation. Returns the previous weight.
    async fn slru_put(&self, keys: &SlruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError>;

    /// Protected hit refreshes recency; probation hit promotes.
    async fn slru_touch(&self, keys: &SlruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError>;

    async fn slru_remove(&self, keys: &SlruKeys, key: &str) -> Result<Option<u64>, IndexError>;

    /// If protected weight exceeds `protected_max`, move protected's eldest
    /// entry into probation with `score`. Returns the demoted entry.
    async fn slru_demote_eldest(
        &self,
        keys: &SlruKeys,
        protected_max: i64,
        score: f64,
    ) -> Result<Option<(String, u64)>, IndexError>;

    /// If probation weight exceeds `probation_max`, pop and delete
    /// probation's eldest entry. Returns the deleted entry.
    async fn slru_pop_probation_eldest(
        &self,
        keys: &SlruKeys,
        probation_max: i64,
    ) -> Result<Option<(String, u64)>, IndexError>;

    /// Counter value, 0 when unset.
    async fn read_counter(&self, key: &str) -> Result<i64, IndexError>;

    async fn hash_contains(&self, hash: &str, field: &str) -> Result<bool, IndexError>;

    async fn hash_len(&self, hash: &str) -> Result<u64, IndexError>;

    /// All fields of a hash, gathered with a cursor scan.
    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>, IndexError>;

    /// Lowest-scored member of a sorted set.
    async fn zset_first(&self, zset: &str) -> Result<Option<String>, IndexError>;
}

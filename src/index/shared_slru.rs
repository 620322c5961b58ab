// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Segmented LRU whose state lives in a [`SharedStore`].
//!
//! New entries land in **probation**. A second touch (`get` or `put`)
//! promotes them to **protected**. Eviction runs two gated phases:
//!
//! ```text
//!   phase A   protected > protected_max  →  demote protected eldest
//!                                           into probation (fresh score,
//!                                           no listener)
//!   phase B   probation > probation_max  →  delete probation eldest,
//!                                           fire listeners
//! ```
//!
//! Both thresholds are checked inside the store transaction that acts on
//! them. `should_evict()` only looks at the global budget.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::traits::{exceeds, CacheIndex, EldestRemovedListener, IndexError};
use super::{now_score, ListenerRegistry};
use crate::eviction::EvictionSignal;
use crate::locator::CacheDirectory;
use crate::store::{affinity_token, SharedStore, SlruKeys};

/// Default share of the budget held by probation.
pub const DEFAULT_PROBATION_FACTOR: f64 = 0.2;
/// Default share of the budget held by protected.
pub const DEFAULT_PROTECTED_FACTOR: f64 = 0.8;

/// Global budget and the two regional thresholds derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentBudget {
    pub max: i64,
    pub probation_max: i64,
    pub protected_max: i64,
}

impl SegmentBudget {
    /// Regions must fit inside the global budget, otherwise the index can be
    /// over `max` with neither region over its own threshold and eviction
    /// makes no progress.
    pub fn check_factors(probation_factor: f64, protected_factor: f64) -> Result<(), IndexError> {
        let unit = 0.0..=1.0;
        if unit.contains(&probation_factor)
            && unit.contains(&protected_factor)
            && probation_factor + protected_factor <= 1.0 + f64::EPSILON
        {
            return Ok(());
        }
        Err(IndexError::InvalidFactors {
            probation: probation_factor,
            protected: protected_factor,
        })
    }

    pub fn split(max: i64, probation_factor: f64, protected_factor: f64) -> Self {
        Self {
            max,
            probation_max: (max as f64 * probation_factor) as i64,
            protected_max: (max as f64 * protected_factor) as i64,
        }
    }
}

pub struct SharedSlruCacheIndex {
    name: String,
    keys: SlruKeys,
    store: Arc<dyn SharedStore>,
    directory: RwLock<CacheDirectory>,
    probation_factor: f64,
    protected_factor: f64,
    budget: RwLock<SegmentBudget>,
    listeners: ListenerRegistry,
    signal: EvictionSignal,
}

impl SharedSlruCacheIndex {
    pub fn new(name: &str, prefix: &str, store: Arc<dyn SharedStore>, directory: CacheDirectory) -> Self {
        Self {
            name: name.to_string(),
            keys: SlruKeys::new(&affinity_token(prefix, name)),
            store,
            directory: RwLock::new(directory),
            probation_factor: DEFAULT_PROBATION_FACTOR,
            protected_factor: DEFAULT_PROTECTED_FACTOR,
            budget: RwLock::new(SegmentBudget::default()),
            listeners: ListenerRegistry::new(name),
            signal: EvictionSignal::new(),
        }
    }

    /// Override the regional split. Applies to the next `set_max_weight`.
    pub fn with_factors(mut self, probation_factor: f64, protected_factor: f64) -> Result<Self, IndexError> {
        SegmentBudget::check_factors(probation_factor, protected_factor)?;
        self.probation_factor = probation_factor;
        self.protected_factor = protected_factor;
        Ok(self)
    }

    pub fn budget(&self) -> SegmentBudget {
        *self.budget.read()
    }

    pub fn keys(&self) -> &SlruKeys {
        &self.keys
    }

    pub async fn probation_weight(&self) -> Result<i64, IndexError> {
        self.store.read_counter(&self.keys.probation_weight).await
    }

    pub async fn protected_weight(&self) -> Result<i64, IndexError> {
        self.store.read_counter(&self.keys.protected_weight).await
    }

    pub async fn in_probation(&self, key: &str) -> Result<bool, IndexError> {
        self.store.hash_contains(&self.keys.probation_values, key).await
    }

    pub async fn in_protected(&self, key: &str) -> Result<bool, IndexError> {
        self.store.hash_contains(&self.keys.protected_values, key).await
    }

    async fn sync_region(&self, values: &str, directory: &CacheDirectory) -> Result<usize, IndexError> {
        let mut removed = 0;
        for key in self.store.hash_fields(values).await? {
            if !directory.exists(&key).await? && self.remove(&key).await?.is_some() {
                debug!(partition = %self.name, key = %key, "Cache file missing, dropped from shared slru");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheIndex for SharedSlruCacheIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, weight: u64, score: Option<f64>) -> Result<Option<u64>, IndexError> {
        let old = self
            .store
            .slru_put(&self.keys, key, weight, score.unwrap_or_else(now_score))
            .await?;
        crate::metrics::record_operation(&self.name, "put");

        if self.should_evict().await? {
            self.signal.release();
        }
        Ok(old)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, IndexError> {
        self.store.slru_touch(&self.keys, key, now_score()).await
    }

    async fn contains_key(&self, key: &str) -> Result<bool, IndexError> {
        Ok(self.in_protected(key).await? || self.in_probation(key).await?)
    }

    async fn remove(&self, key: &str) -> Result<Option<u64>, IndexError> {
        let removed = self.store.slru_remove(&self.keys, key).await?;
        if removed.is_some() {
            crate::metrics::record_operation(&self.name, "remove");
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        let protected = self.store.hash_len(&self.keys.protected_values).await?;
        let probation = self.store.hash_len(&self.keys.probation_values).await?;
        Ok(protected + probation)
    }

    async fn weight(&self) -> Result<u64, IndexError> {
        let total = self.store.read_counter(&self.keys.total_weight).await?;
        Ok(total.max(0) as u64)
    }

    fn set_max_weight(&self, max: i64) {
        *self.budget.write() = SegmentBudget::split(max, self.probation_factor, self.protected_factor);
    }

    fn max_weight(&self) -> i64 {
        self.budget.read().max
    }

    fn set_capacity(&self, _capacity: usize) -> Result<(), IndexError> {
        Err(IndexError::Unsupported {
            index: "SharedSlruCacheIndex",
            operation: "set_capacity",
        })
    }

    fn capacity(&self) -> usize {
        0
    }

    async fn eldest_key(&self) -> Result<Option<String>, IndexError> {
        if let Some(key) = self.store.zset_first(&self.keys.probation_lru).await? {
            return Ok(Some(key));
        }
        self.store.zset_first(&self.keys.protected_lru).await
    }

    async fn evict_eldest(&self) -> Result<Option<(String, u64)>, IndexError> {
        let budget = self.budget();
        if budget.max <= 0 {
            return Ok(None);
        }

        if let Some((key, weight)) = self
            .store
            .slru_demote_eldest(&self.keys, budget.protected_max, now_score())
            .await?
        {
            debug!(partition = %self.name, key = %key, weight, "Demoted to probation");
            crate::metrics::record_demotion(&self.name);
        }

        let evicted = self
            .store
            .slru_pop_probation_eldest(&self.keys, budget.probation_max)
            .await?;
        if let Some((key, weight)) = &evicted {
            debug!(partition = %self.name, key = %key, weight, "Evicted from probation");
            crate::metrics::record_eviction(&self.name, 1, *weight);
            self.listeners.notify(key, *weight).await;
        }
        Ok(evicted)
    }

    async fn should_evict(&self) -> Result<bool, IndexError> {
        let max = self.max_weight();
        if max <= 0 {
            return Ok(false);
        }
        Ok(exceeds(max, self.weight().await?))
    }

    async fn sync(&self) -> Result<usize, IndexError> {
        let directory = self.directory();
        let protected = self.sync_region(&self.keys.protected_values, &directory).await?;
        let probation = self.sync_region(&self.keys.probation_values, &directory).await?;
        Ok(protected + probation)
    }

    fn directory(&self) -> CacheDirectory {
        self.directory.read().clone()
    }

    fn set_directory(&self, directory: CacheDirectory) {
        *self.directory.write() = directory;
    }

    fn add_eldest_removed_listener(&self, listener: Arc<dyn EldestRemovedListener>) {
        self.listeners.add(listener);
    }

    fn eldest_removed_listeners(&self) -> Vec<Arc<dyn EldestRemovedListener>> {
        self.listeners.snapshot()
    }

    fn eviction_signal(&self) -> EvictionSignal {
        self.signal.clone()
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-region LRU whose state lives in a [`SharedStore`].
//!
//! Every instance pointing at the same store and partition sees the same
//! queue. Pop-and-delete of the eldest entry is one store transaction; this
//! index never reads "the eldest key" and then acts on it separately.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::traits::{exceeds, CacheIndex, EldestRemovedListener, IndexError};
use super::{now_score, ListenerRegistry};
use crate::eviction::EvictionSignal;
use crate::locator::CacheDirectory;
use crate::store::{affinity_token, LruKeys, SharedStore};

pub struct SharedLruCacheIndex {
    name: String,
    keys: LruKeys,
    store: Arc<dyn SharedStore>,
    directory: RwLock<CacheDirectory>,
    max_weight: AtomicI64,
    listeners: ListenerRegistry,
    signal: EvictionSignal,
}

impl SharedLruCacheIndex {
    /// Collections are named `{prefix}{name}:…`.
    pub fn new(name: &str, prefix: &str, store: Arc<dyn SharedStore>, directory: CacheDirectory) -> Self {
        Self {
            name: name.to_string(),
            keys: LruKeys::new(&affinity_token(prefix, name)),
            store,
            directory: RwLock::new(directory),
            max_weight: AtomicI64::new(0),
            listeners: ListenerRegistry::new(name),
            signal: EvictionSignal::new(),
        }
    }

    pub fn keys(&self) -> &LruKeys {
        &self.keys
    }
}

#[async_trait]
impl CacheIndex for SharedLruCacheIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, weight: u64, score: Option<f64>) -> Result<Option<u64>, IndexError> {
        let old = self
            .store
            .lru_put(&self.keys, key, weight, score.unwrap_or_else(now_score))
            .await?;
        crate::metrics::record_operation(&self.name, "put");

        if self.should_evict().await? {
            self.signal.release();
        }
        Ok(old)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, IndexError> {
        self.store.lru_touch(&self.keys, key, now_score()).await
    }

    async fn contains_key(&self, key: &str) -> Result<bool, IndexError> {
        self.store.hash_contains(&self.keys.values, key).await
    }

    async fn remove(&self, key: &str) -> Result<Option<u64>, IndexError> {
        let removed = self.store.lru_remove(&self.keys, key).await?;
        if removed.is_some() {
            crate::metrics::record_operation(&self.name, "remove");
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        self.store.hash_len(&self.keys.values).await
    }

    async fn weight(&self) -> Result<u64, IndexError> {
        let total = self.store.read_counter(&self.keys.total_weight).await?;
        Ok(total.max(0) as u64)
    }

    fn set_max_weight(&self, max: i64) {
        self.max_weight.store(max, Ordering::Relaxed);
    }

    fn max_weight(&self) -> i64 {
        self.max_weight.load(Ordering::Relaxed)
    }

    fn set_capacity(&self, _capacity: usize) -> Result<(), IndexError> {
        Err(IndexError::Unsupported {
            index: "SharedLruCacheIndex",
            operation: "set_capacity",
        })
    }

    fn capacity(&self) -> usize {
        0
    }

    async fn eldest_key(&self) -> Result<Option<String>, IndexError> {
        self.store.zset_first(&self.keys.lru).await
    }

    async fn evict_eldest(&self) -> Result<Option<(String, u64)>, IndexError> {
        let evicted = self.store.lru_pop_eldest(&self.keys).await?;
        if let Some((key, weight)) = &evicted {
            debug!(partition = %self.name, key = %key, weight, "Evicted from shared lru");
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
        let mut removed = 0;
        for key in self.store.hash_fields(&self.keys.values).await? {
            if !directory.exists(&key).await? && self.remove(&key).await?.is_some() {
                debug!(partition = %self.name, key = %key, "Cache file missing, dropped from shared lru");
                removed += 1;
            }
        }
        Ok(removed)
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

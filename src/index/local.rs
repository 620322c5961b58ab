// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single-process cache index.
//!
//! Recency order plus a [`FrequencySketch`] for admission: once the
//! partition is full, a new key only gets in if it has been seen more often
//! than the entry it would push out. Ties keep the incumbent.
//!
//! All state sits behind one per-partition mutex. There is no coordination
//! with other processes; use a shared index for that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::sketch::FrequencySketch;
use super::traits::{exceeds, CacheIndex, EldestRemovedListener, IndexError};
use super::{now_score, ListenerRegistry};
use crate::eviction::EvictionSignal;
use crate::locator::CacheDirectory;
use crate::store::zset::ZSet;

struct LocalState {
    weights: HashMap<String, u64>,
    order: ZSet,
    total_weight: u64,
    sketch: FrequencySketch,
}

impl LocalState {
    fn remove(&mut self, key: &str) -> Option<u64> {
        let weight = self.weights.remove(key)?;
        self.order.remove(key);
        self.total_weight -= weight;
        Some(weight)
    }
}

enum Admission {
    Updated(u64),
    Inserted,
    Rejected,
}

pub struct LocalCacheIndex {
    name: String,
    directory: RwLock<CacheDirectory>,
    state: Mutex<LocalState>,
    max_weight: AtomicI64,
    capacity: AtomicUsize,
    listeners: ListenerRegistry,
    signal: EvictionSignal,
}

impl LocalCacheIndex {
    /// `sketch_width` should be in the order of the expected entry count.
    pub fn new(name: &str, directory: CacheDirectory, sketch_width: usize) -> Self {
        Self {
            name: name.to_string(),
            directory: RwLock::new(directory),
            state: Mutex::new(LocalState {
                weights: HashMap::new(),
                order: ZSet::new(),
                total_weight: 0,
                sketch: FrequencySketch::new(sketch_width),
            }),
            max_weight: AtomicI64::new(0),
            capacity: AtomicUsize::new(0),
            listeners: ListenerRegistry::new(name),
            signal: EvictionSignal::new(),
        }
    }

    /// Estimated access frequency of `key`.
    pub fn frequency(&self, key: &str) -> u8 {
        self.state.lock().sketch.frequency(key)
    }

    fn over_budget(&self, weight: u64, count: usize) -> bool {
        let capacity = self.capacity.load(Ordering::Relaxed);
        exceeds(self.max_weight.load(Ordering::Relaxed), weight)
            || (capacity > 0 && count > capacity)
    }

    fn admit(&self, key: &str, weight: u64, score: f64) -> Admission {
        let mut state = self.state.lock();
        state.sketch.increment(key);

        if let Some(old) = state.weights.insert(key.to_string(), weight) {
            state.total_weight = state.total_weight - old + weight;
            state.order.add(key, score);
            return Admission::Updated(old);
        }

        let would_overflow = self.over_budget(state.total_weight + weight, state.weights.len());
        if would_overflow {
            if let Some(victim) = state.order.first() {
                let candidate_freq = state.sketch.frequency(key);
                let victim_freq = state.sketch.frequency(victim);
                if candidate_freq <= victim_freq {
                    state.weights.remove(key);
                    return Admission::Rejected;
                }
            }
        }

        state.order.add(key, score);
        state.total_weight += weight;
        Admission::Inserted
    }
}

#[async_trait]
impl CacheIndex for LocalCacheIndex {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, weight: u64, score: Option<f64>) -> Result<Option<u64>, IndexError> {
        let previous = match self.admit(key, weight, score.unwrap_or_else(now_score)) {
            Admission::Updated(old) => Some(old),
            Admission::Inserted => None,
            Admission::Rejected => {
                debug!(partition = %self.name, key = %key, weight, "Admission rejected candidate");
                crate::metrics::record_eviction(&self.name, 1, weight);
                self.listeners.notify(key, weight).await;
                return Ok(None);
            }
        };
        crate::metrics::record_operation(&self.name, "put");

        if self.should_evict().await? {
            self.signal.release();
        }
        Ok(previous)
    }

    async fn get(&self, key: &str) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();
        state.sketch.increment(key);
        let weight = state.weights.get(key).copied();
        if weight.is_some() {
            state.order.add(key, now_score());
        }
        Ok(weight)
    }

    async fn contains_key(&self, key: &str) -> Result<bool, IndexError> {
        Ok(self.state.lock().weights.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<Option<u64>, IndexError> {
        let removed = self.state.lock().remove(key);
        if removed.is_some() {
            debug!(partition = %self.name, key = %key, "Removed from local index");
            crate::metrics::record_operation(&self.name, "remove");
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, IndexError> {
        Ok(self.state.lock().weights.len() as u64)
    }

    async fn weight(&self) -> Result<u64, IndexError> {
        Ok(self.state.lock().total_weight)
    }

    fn set_max_weight(&self, max: i64) {
        self.max_weight.store(max, Ordering::Relaxed);
    }

    fn max_weight(&self) -> i64 {
        self.max_weight.load(Ordering::Relaxed)
    }

    fn set_capacity(&self, capacity: usize) -> Result<(), IndexError> {
        self.capacity.store(capacity, Ordering::Relaxed);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    async fn eldest_key(&self) -> Result<Option<String>, IndexError> {
        Ok(self.state.lock().order.first().map(str::to_string))
    }

    async fn evict_eldest(&self) -> Result<Option<(String, u64)>, IndexError> {
        let evicted = {
            let mut state = self.state.lock();
            state.order.pop_first().and_then(|key| {
                let weight = state.weights.remove(&key)?;
                state.total_weight -= weight;
                Some((key, weight))
            })
        };

        if let Some((key, weight)) = &evicted {
            debug!(partition = %self.name, key = %key, weight, "Evicted from local index");
            crate::metrics::record_eviction(&self.name, 1, *weight);
            self.listeners.notify(key, *weight).await;
        }
        Ok(evicted)
    }

    async fn should_evict(&self) -> Result<bool, IndexError> {
        let (weight, count) = {
            let state = self.state.lock();
            (state.total_weight, state.weights.len())
        };
        Ok(self.over_budget(weight, count))
    }

    async fn sync(&self) -> Result<usize, IndexError> {
        let keys: Vec<String> = self.state.lock().weights.keys().cloned().collect();
        let directory = self.directory();
        let mut removed = 0;
        for key in keys {
            if !directory.exists(&key).await? && self.remove(&key).await?.is_some() {
                debug!(partition = %self.name, key = %key, "Cache file missing, dropped from index");
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

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`SharedStore`].
//!
//! Models the same collections as Redis (sorted sets, hashes, counters) and
//! runs each transaction under one lock. Indices sharing an `Arc` of this
//! store behave exactly like instances sharing a Redis server, which makes
//! it the store for single-node deployments and for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{LruKeys, SharedStore, SlruKeys};
use super::zset::ZSet;
use crate::index::IndexError;

#[derive(Default)]
struct MemoryState {
    zsets: HashMap<String, ZSet>,
    hashes: HashMap<String, HashMap<String, u64>>,
    counters: HashMap<String, i64>,
}

impl MemoryState {
    fn zset(&mut self, name: &str) -> &mut ZSet {
        self.zsets.entry(name.to_string()).or_default()
    }

    fn hash(&mut self, name: &str) -> &mut HashMap<String, u64> {
        self.hashes.entry(name.to_string()).or_default()
    }

    fn hget(&self, name: &str, field: &str) -> Option<u64> {
        self.hashes.get(name).and_then(|h| h.get(field).copied())
    }

    fn incr(&mut self, name: &str, delta: i64) {
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    fn counter(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Remove `member` from a queue/values pair and its counters.
    fn take(&mut self, lru: &str, values: &str, counters: &[&str], member: &str) -> Option<u64> {
        let weight = self.hash(values).remove(member)?;
        self.zset(lru).remove(member);
        for counter in counters {
            self.incr(counter, -(weight as i64));
        }
        Some(weight)
    }
}

#[derive(Default)]
pub struct MemoryIndexStore {
    state: Mutex<MemoryState>,
}

impl MemoryIndexStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Members of a sorted set in score order.
    #[cfg(test)]
    pub(crate) fn zset_members(&self, zset: &str) -> Vec<String> {
        self.state
            .lock()
            .zsets
            .get(zset)
            .map(|z| z.members().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SharedStore for MemoryIndexStore {
    async fn lru_put(&self, keys: &LruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();
        state.zset(&keys.lru).add(key, score);
        let old = state.hash(&keys.values).insert(key.to_string(), weight);
        let delta = weight as i64 - old.unwrap_or(0) as i64;
        state.incr(&keys.total_weight, delta);
        Ok(old)
    }

    async fn lru_touch(&self, keys: &LruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();
        let weight = state.hget(&keys.values, key);
        if weight.is_some() {
            state.zset(&keys.lru).add(key, score);
        }
        Ok(weight)
    }

    async fn lru_remove(&self, keys: &LruKeys, key: &str) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();
        Ok(state.take(&keys.lru, &keys.values, &[&keys.total_weight], key))
    }

    async fn lru_pop_eldest(&self, keys: &LruKeys) -> Result<Option<(String, u64)>, IndexError> {
        let mut state = self.state.lock();
        let Some(member) = state.zset(&keys.lru).pop_first() else {
            return Ok(None);
        };
        let weight = state.hash(&keys.values).remove(&member).unwrap_or(0);
        state.incr(&keys.total_weight, -(weight as i64));
        Ok(Some((member, weight)))
    }

    async fn slru_put(&self, keys: &SlruKeys, key: &str, weight: u64, score: f64) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();

        if let Some(old) = state.hget(&keys.protected_values, key) {
            let delta = weight as i64 - old as i64;
            state.zset(&keys.protected_lru).add(key, score);
            state.hash(&keys.protected_values).insert(key.to_string(), weight);
            state.incr(&keys.protected_weight, delta);
            state.incr(&keys.total_weight, delta);
            return Ok(Some(old));
        }

        if let Some(old) = state.take(&keys.probation_lru, &keys.probation_values, &[&keys.probation_weight], key) {
            state.zset(&keys.protected_lru).add(key, score);
            state.hash(&keys.protected_values).insert(key.to_string(), weight);
            state.incr(&keys.protected_weight, weight as i64);
            state.incr(&keys.total_weight, weight as i64 - old as i64);
            return Ok(Some(old));
        }

        state.zset(&keys.probation_lru).add(key, score);
        state.hash(&keys.probation_values).insert(key.to_string(), weight);
        state.incr(&keys.probation_weight, weight as i64);
        state.incr(&keys.total_weight, weight as i64);
        Ok(None)
    }

    async fn slru_touch(&self, keys: &SlruKeys, key: &str, score: f64) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();

        if let Some(weight) = state.hget(&keys.protected_values, key) {
            state.zset(&keys.protected_lru).add(key, score);
            return Ok(Some(weight));
        }

        if let Some(weight) = state.take(&keys.probation_lru, &keys.probation_values, &[&keys.probation_weight], key) {
            state.zset(&keys.protected_lru).add(key, score);
            state.hash(&keys.protected_values).insert(key.to_string(), weight);
            state.incr(&keys.protected_weight, weight as i64);
            return Ok(Some(weight));
        }

        Ok(None)
    }

    async fn slru_remove(&self, keys: &SlruKeys, key: &str) -> Result<Option<u64>, IndexError> {
        let mut state = self.state.lock();
        let removed = state.take(
            &keys.protected_lru,
            &keys.protected_values,
            &[&keys.protected_weight, &keys.total_weight],
            key,
        );
        if removed.is_some() {
            return Ok(removed);
        }
        Ok(state.take(
            &keys.probation_lru,
            &keys.probation_values,
            &[&keys.probation_weight, &keys.total_weight],
            key,
        ))
    }

    async fn slru_demote_eldest(
        &self,
        keys: &SlruKeys,
        protected_max: i64,
        score: f64,
    ) -> Result<Option<(String, u64)>, IndexError> {
        let mut state = self.state.lock();
        if state.counter(&keys.protected_weight) <= protected_max {
            return Ok(None);
        }
        let Some(member) = state.zset(&keys.protected_lru).pop_first() else {
            return Ok(None);
        };
        let weight = state.hash(&keys.protected_values).remove(&member).unwrap_or(0);
        state.incr(&keys.protected_weight, -(weight as i64));
        state.zset(&keys.probation_lru).add(&member, score);
        state.hash(&keys.probation_values).insert(member.clone(), weight);
        state.incr(&keys.probation_weight, weight as i64);
        Ok(Some((member, weight)))
    }

    async fn slru_pop_probation_eldest(
        &self,
        keys: &SlruKeys,
        probation_max: i64,
    ) -> Result<Option<(String, u64)>, IndexError> {
        let mut state = self.state.lock();
        if state.counter(&keys.probation_weight) <= probation_max {
            return Ok(None);
        }
        let Some(member) = state.zset(&keys.probation_lru).pop_first() else {
            return Ok(None);
        };
        let weight = state.hash(&keys.probation_values).remove(&member).unwrap_or(0);
        state.incr(&keys.probation_weight, -(weight as i64));
        state.incr(&keys.total_weight, -(weight as i64));
        Ok(Some((member, weight)))
    }

    async fn read_counter(&self, key: &str) -> Result<i64, IndexError> {
        Ok(self.state.lock().counter(key))
    }

    async fn hash_contains(&self, hash: &str, field: &str) -> Result<bool, IndexError> {
        Ok(self.state.lock().hget(hash, field).is_some())
    }

    async fn hash_len(&self, hash: &str) -> Result<u64, IndexError> {
        Ok(self.state.lock().hashes.get(hash).map_or(0, |h| h.len() as u64))
    }

    async fn hash_fields(&self, hash: &str) -> Result<Vec<String>, IndexError> {
        Ok(self
            .state
            .lock()
            .hashes
            .get(hash)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn zset_first(&self, zset: &str) -> Result<Option<String>, IndexError> {
        Ok(self
            .state
            .lock()
            .zsets
            .get(zset)
            .and_then(|z| z.first().map(str::to_string)))
    }
}

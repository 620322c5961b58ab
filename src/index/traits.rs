// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::eviction::EvictionSignal;
use crate::locator::CacheDirectory;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Shared store error: {0}")]
    Store(String),
    #[error("Operation not supported by {index}: {operation}")]
    Unsupported {
        index: &'static str,
        operation: &'static str,
    },
    #[error("Corrupt weight for '{key}': {value}")]
    CorruptValue { key: String, value: String },
    #[error("Invalid SLRU split: probation {probation}, protected {protected} (each in [0, 1], sum at most 1)")]
    InvalidFactors { probation: f64, protected: f64 },
    #[error("Cache directory error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to delete cache file {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Listener failed: {0}")]
    Other(String),
}

/// Callback fired after an entry has been evicted from an index.
///
/// The index has already dropped the entry when this runs; a failing listener
/// does not bring it back.
#[async_trait]
pub trait EldestRemovedListener: Send + Sync {
    async fn on_eldest_removed(&self, key: &str, weight: u64) -> Result<(), ListenerError>;
}

/// Weight-bounded cache index for one partition.
///
/// Keys are content fingerprints, values are byte weights. Implementations
/// differ in where the state lives (process memory or a shared store) and in
/// the replacement policy (LRU or segmented LRU).
#[async_trait]
pub trait CacheIndex: Send + Sync {
    /// Partition name this index tracks.
    fn name(&self) -> &str;

    /// Insert or update `key`, returning the previous weight.
    ///
    /// `score` is the recency score to record; `None` means "now".
    async fn put(&self, key: &str, weight: u64, score: Option<f64>) -> Result<Option<u64>, IndexError>;

    /// Look up `key` and refresh its recency.
    async fn get(&self, key: &str) -> Result<Option<u64>, IndexError>;

    async fn contains_key(&self, key: &str) -> Result<bool, IndexError>;

    async fn remove(&self, key: &str) -> Result<Option<u64>, IndexError>;

    async fn count(&self) -> Result<u64, IndexError>;

    /// Total tracked weight.
    async fn weight(&self) -> Result<u64, IndexError>;

    /// Zero or negative disables eviction.
    fn set_max_weight(&self, max: i64);

    fn max_weight(&self) -> i64;

    /// Entry-count capacity. Weight-only indices return [`IndexError::Unsupported`].
    fn set_capacity(&self, capacity: usize) -> Result<(), IndexError>;

    fn capacity(&self) -> usize;

    /// Next entry the policy would remove.
    async fn eldest_key(&self) -> Result<Option<String>, IndexError>;

    /// Run one eviction step, returning the entry that left the index (if any).
    async fn evict_eldest(&self) -> Result<Option<(String, u64)>, IndexError>;

    async fn should_evict(&self) -> Result<bool, IndexError>;

    /// Drop keys whose cached file no longer exists. Returns how many were removed.
    async fn sync(&self) -> Result<usize, IndexError>;

    /// Cache root that `sync` checks files against.
    fn directory(&self) -> CacheDirectory;

    /// Point `sync` at another cache root. Takes effect on the next `sync`.
    fn set_directory(&self, directory: CacheDirectory);

    fn add_eldest_removed_listener(&self, listener: Arc<dyn EldestRemovedListener>);

    fn eldest_removed_listeners(&self) -> Vec<Arc<dyn EldestRemovedListener>>;

    /// Signal released whenever a write leaves the index over budget.
    fn eviction_signal(&self) -> EvictionSignal;
}

/// `max > 0 && current > max`
#[inline]
pub(crate) fn exceeds(max: i64, current: u64) -> bool {
    max > 0 && current > max as u64
}

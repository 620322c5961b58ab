// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache index implementations.
//!
//! # Variants
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CacheIndex contract                     │
//! ├──────────────────────────────────────────────────────────────┤
//! │  local.rs        - in-process LRU + frequency admission      │
//! │  shared_lru.rs   - single queue in a SharedStore             │
//! │  shared_slru.rs  - probation/protected queues in SharedStore │
//! ├──────────────────────────────────────────────────────────────┤
//! │  sketch.rs       - count-min frequency estimator (local)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation that touches more than one collection of a shared index is
//! a single store transaction, so any number of server instances can share
//! one partition without client-side locking.

pub mod traits;
pub mod sketch;
pub mod local;
pub mod shared_lru;
pub mod shared_slru;

pub use traits::{CacheIndex, EldestRemovedListener, IndexError, ListenerError};
pub use local::LocalCacheIndex;
pub use shared_lru::SharedLruCacheIndex;
pub use shared_slru::{SegmentBudget, SharedSlruCacheIndex};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::warn;

/// Recency score for "now": milliseconds since the Unix epoch.
pub(crate) fn now_score() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or_default()
}

/// Partition-scoped, mutable list of eldest-removed listeners.
pub(crate) struct ListenerRegistry {
    partition: String,
    listeners: RwLock<Vec<Arc<dyn EldestRemovedListener>>>,
}

impl ListenerRegistry {
    pub(crate) fn new(partition: &str) -> Self {
        Self {
            partition: partition.to_string(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn EldestRemovedListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn EldestRemovedListener>> {
        self.listeners.read().clone()
    }

    /// Fire every listener in registration order. Failures are logged and
    /// do not stop the remaining listeners.
    pub(crate) async fn notify(&self, key: &str, weight: u64) {
        for listener in self.snapshot() {
            if let Err(e) = listener.on_eldest_removed(key, weight).await {
                warn!(
                    partition = %self.partition,
                    key = %key,
                    error = %e,
                    "Eldest-removed listener failed"
                );
                crate::metrics::record_listener_failure(&self.partition);
            }
        }
    }
}

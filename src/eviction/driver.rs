// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background eviction worker, one per partition.
//!
//! ```text
//! put() ── over budget ──► signal.release()
//!                              │
//!               ┌──────────────▼───────────────┐
//!               │ wait ─► round ─► drain ─► wait │
//!               └──────────────────────────────┘
//! round: while should_evict() && steps < max_evict_count { evict_eldest() }
//! ```
//!
//! Writers never wait on eviction. A round that hits the step cap while the
//! partition is still over budget ends early; the next write that overflows
//! the budget starts another one.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::EvictionSignal;
use crate::index::{CacheIndex, IndexError};

/// Default cap on eviction steps per round.
pub const MAX_EVICT_COUNT: usize = 1000;

/// What a single eviction round did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundOutcome {
    /// `evict_eldest()` calls made.
    pub steps: usize,
    /// Entries that left the index.
    pub evicted: usize,
    pub evicted_bytes: u64,
    /// Stopped at the step cap while still over budget.
    pub capped: bool,
}

/// Evict until the index is within budget or `max_evict_count` steps ran.
pub async fn run_round(
    index: &dyn CacheIndex,
    max_evict_count: usize,
) -> Result<RoundOutcome, IndexError> {
    let mut outcome = RoundOutcome::default();

    while outcome.steps < max_evict_count && index.should_evict().await? {
        outcome.steps += 1;
        if let Some((_, weight)) = index.evict_eldest().await? {
            outcome.evicted += 1;
            outcome.evicted_bytes += weight;
        }
    }

    if outcome.steps >= max_evict_count && index.should_evict().await? {
        outcome.capped = true;
        info!(
            partition = %index.name(),
            max_evict_count,
            "Eviction round hit step cap while still over budget, deferring to next round"
        );
    }

    Ok(outcome)
}

/// Handle to a partition's eviction task.
///
/// The task holds only a weak reference to the index, so dropping the last
/// strong reference also ends the loop at its next wake-up.
pub struct EvictionDriver {
    partition: String,
    signal: EvictionSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EvictionDriver {
    /// Spawn the worker onto the current tokio runtime.
    pub fn spawn(index: &Arc<dyn CacheIndex>, max_evict_count: usize) -> Self {
        let partition = index.name().to_string();
        let signal = index.eviction_signal();
        let handle = tokio::spawn(drive(
            Arc::downgrade(index),
            signal.clone(),
            partition.clone(),
            max_evict_count.max(1),
        ));

        Self {
            partition,
            signal,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Interrupt the wait and join the task.
    pub async fn shutdown(&self) {
        self.signal.close();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(partition = %self.partition, error = %e, "Eviction driver task failed");
            }
        }
    }
}

impl Drop for EvictionDriver {
    fn drop(&mut self) {
        self.signal.close();
    }
}

async fn drive(
    index: Weak<dyn CacheIndex>,
    signal: EvictionSignal,
    partition: String,
    max_evict_count: usize,
) {
    debug!(partition = %partition, "Eviction driver started");

    while signal.wait().await {
        let Some(target) = index.upgrade() else {
            break;
        };

        // Own task per round: a panic inside the round ends the round, not the driver.
        let round = tokio::spawn(async move { run_round(target.as_ref(), max_evict_count).await });

        match round.await {
            Ok(Ok(outcome)) => {
                if outcome.steps > 0 {
                    info!(
                        partition = %partition,
                        steps = outcome.steps,
                        evicted = outcome.evicted,
                        evicted_bytes = outcome.evicted_bytes,
                        capped = outcome.capped,
                        "Eviction round finished"
                    );
                }
                crate::metrics::record_eviction_round(&partition, outcome.steps, outcome.capped);
            }
            Ok(Err(e)) => {
                error!(partition = %partition, error = %e, "Eviction round failed");
                crate::metrics::record_error(&partition, "evict");
            }
            Err(e) => {
                error!(partition = %partition, error = %e, "Eviction round aborted");
                crate::metrics::record_error(&partition, "evict");
            }
        }

        signal.drain();
    }

    debug!(partition = %partition, "Eviction driver stopped");
}

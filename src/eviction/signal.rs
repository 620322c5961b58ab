// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Upper bound on buffered releases; anything above one only means "stay awake".
const MAX_PENDING: usize = 1 << 16;

/// Counting wake-up signal between writers and a partition's eviction driver.
///
/// Releases are cumulative: releasing while the driver is busy keeps a
/// permit pending, so a wake-up is never lost.
#[derive(Clone, Debug)]
pub struct EvictionSignal {
    permits: Arc<Semaphore>,
}

impl EvictionSignal {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Never blocks.
    pub fn release(&self) {
        if !self.permits.is_closed() && self.permits.available_permits() < MAX_PENDING {
            self.permits.add_permits(1);
        }
    }

    /// Park until released. Returns `false` once the signal is closed.
    pub async fn wait(&self) -> bool {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Discard pending releases, returning how many were dropped.
    pub fn drain(&self) -> usize {
        let pending = self.permits.available_permits();
        if pending == 0 {
            return 0;
        }
        let n = u32::try_from(pending).unwrap_or(u32::MAX);
        match self.permits.try_acquire_many(n) {
            Ok(permits) => {
                permits.forget();
                n as usize
            }
            Err(_) => 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wake any waiter and stop accepting releases.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for EvictionSignal {
    fn default() -> Self {
        Self::new()
    }
}

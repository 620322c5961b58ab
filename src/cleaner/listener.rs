// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use super::collaborators::{CacheFileRemover, CollaboratorError, StorageCredentials};
use crate::index::{EldestRemovedListener, ListenerError};
use crate::locator::FileLocator;

/// Deletes the cached file of every entry evicted from a partition.
///
/// Credentials are swapped in place by the cleaner's refresh; an eviction
/// in flight keeps the snapshot it started with.
pub struct FileDeletingListener {
    partition: String,
    credentials: RwLock<StorageCredentials>,
    locator: Arc<dyn FileLocator>,
    remover: Arc<dyn CacheFileRemover>,
}

impl FileDeletingListener {
    pub fn new(
        partition: &str,
        credentials: StorageCredentials,
        locator: Arc<dyn FileLocator>,
        remover: Arc<dyn CacheFileRemover>,
    ) -> Self {
        Self {
            partition: partition.to_string(),
            credentials: RwLock::new(credentials),
            locator,
            remover,
        }
    }

    pub fn credentials(&self) -> StorageCredentials {
        self.credentials.read().clone()
    }

    pub fn update_credentials(&self, credentials: StorageCredentials) {
        *self.credentials.write() = credentials;
    }
}

#[async_trait]
impl EldestRemovedListener for FileDeletingListener {
    async fn on_eldest_removed(&self, key: &str, weight: u64) -> Result<(), ListenerError> {
        let credentials = self.credentials();
        let path = self.locator.locate(key);

        match self.remover.delete_cache_file(&path, key, &credentials).await {
            Ok(()) => {
                info!(partition = %self.partition, sha256 = %key, weight, "Evicted cache file");
                Ok(())
            }
            Err(CollaboratorError::Delete { path, source }) => Err(ListenerError::Delete { path, source }),
            Err(e) => Err(ListenerError::Other(e.to_string())),
        }
    }
}

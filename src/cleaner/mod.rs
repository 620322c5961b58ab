// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache cleaner: partitions, inbound events and periodic refresh.
//!
//! # Architecture
//!
//! ```text
//! on_cache_accessed ─┐                     ┌─► CacheIndex (local│lru│slru)
//! on_cache_deleted ──┼─► partition(key) ───┤        │ over budget
//!                    │   (lazy, once)      │        ▼
//! refresh() ─────────┘                     ├─► EvictionDriver
//!   max_weight, credentials                │        │ evict_eldest()
//!                                          └─► FileDeletingListener ─► CacheFileRemover
//! ```
//!
//! Nothing here fails the caller: a broken cache layer only means more
//! fetches from backing storage. Errors are logged and counted.

pub mod collaborators;
pub mod listener;

pub use collaborators::{
    partition_key, CacheFileRemover, CacheProperties, CollaboratorError, CredentialsProvider,
    FsCacheFileRemover, NodeLocation, NodeResolver, StaticCredentialsProvider, StorageCredentials,
    DEFAULT_PARTITION,
};
pub use listener::FileDeletingListener;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::config::{CacheCleanerConfig, IndexPolicy};
use crate::eviction::EvictionDriver;
use crate::index::{CacheIndex, IndexError, LocalCacheIndex, SharedLruCacheIndex, SharedSlruCacheIndex};
use crate::locator::{is_digest, CacheDirectory, FileLocator, HashFileLocator};
use crate::resilience::retry::{retry, RetryConfig};
use crate::store::{MemoryIndexStore, RedisIndexStore, SharedStore};

#[derive(Error, Debug)]
pub enum CleanerError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

/// One capacity-bounded namespace: its index, eviction worker and
/// file-deleting listener.
pub struct Partition {
    index: Arc<dyn CacheIndex>,
    driver: EvictionDriver,
    listener: Arc<FileDeletingListener>,
    policy: IndexPolicy,
}

impl Partition {
    pub fn index(&self) -> &Arc<dyn CacheIndex> {
        &self.index
    }

    pub fn driver(&self) -> &EvictionDriver {
        &self.driver
    }

    pub fn listener(&self) -> &Arc<FileDeletingListener> {
        &self.listener
    }

    pub fn policy(&self) -> IndexPolicy {
        self.policy
    }
}

pub struct CacheCleaner {
    config: CacheCleanerConfig,
    store: Arc<dyn SharedStore>,
    credentials: Arc<dyn CredentialsProvider>,
    nodes: Arc<dyn NodeResolver>,
    remover: Arc<dyn CacheFileRemover>,
    locator: Arc<dyn FileLocator>,
    partitions: DashMap<String, Arc<Partition>>,
}

impl CacheCleaner {
    pub fn new(
        config: CacheCleanerConfig,
        store: Arc<dyn SharedStore>,
        credentials: Arc<dyn CredentialsProvider>,
        nodes: Arc<dyn NodeResolver>,
        remover: Arc<dyn CacheFileRemover>,
    ) -> Self {
        Self {
            config,
            store,
            credentials,
            nodes,
            remover,
            locator: Arc::new(HashFileLocator),
            partitions: DashMap::new(),
        }
    }

    /// Build with the store the config names: Redis when `redis_url` is
    /// set, otherwise an in-process store.
    pub async fn connect(
        config: CacheCleanerConfig,
        credentials: Arc<dyn CredentialsProvider>,
        nodes: Arc<dyn NodeResolver>,
        remover: Arc<dyn CacheFileRemover>,
    ) -> Result<Self, CleanerError> {
        config.validate()?;
        let store: Arc<dyn SharedStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisIndexStore::connect(url).await?),
            None => {
                if config.policy.is_shared() {
                    warn!("No redis_url configured, shared indices only coordinate within this process");
                }
                Arc::new(MemoryIndexStore::new())
            }
        };
        Ok(Self::new(config, store, credentials, nodes, remover))
    }

    #[must_use]
    pub fn with_locator(mut self, locator: Arc<dyn FileLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &CacheCleanerConfig {
        &self.config
    }

    /// Existing partition, without creating one.
    pub fn partition(&self, storage_key: Option<&str>) -> Option<Arc<Partition>> {
        self.partitions
            .get(partition_key(storage_key))
            .map(|p| Arc::clone(p.value()))
    }

    pub fn index(&self, storage_key: Option<&str>) -> Option<Arc<dyn CacheIndex>> {
        self.partition(storage_key).map(|p| Arc::clone(&p.index))
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition for `storage_key`, created on first use.
    ///
    /// Credentials are fetched before the map is touched; of several
    /// concurrent first callers exactly one builds the partition.
    pub async fn get_or_create(&self, storage_key: Option<&str>) -> Result<Arc<Partition>, CleanerError> {
        if let Some(existing) = self.partition(storage_key) {
            return Ok(existing);
        }

        let credentials = self.credentials.find_credentials(storage_key).await?;
        let key = partition_key(storage_key).to_string();
        let partition = self
            .partitions
            .entry(key.clone())
            .or_try_insert_with(|| self.build_partition(&key, credentials).map(Arc::new))?
            .value()
            .clone();

        crate::metrics::set_partitions(self.partitions.len());
        Ok(partition)
    }

    fn build_partition(&self, key: &str, credentials: StorageCredentials) -> Result<Partition, CleanerError> {
        let policy = credentials.cache.policy.unwrap_or(self.config.policy);
        let directory = CacheDirectory::new(credentials.cache.path.clone(), Arc::clone(&self.locator));
        let prefix = &self.config.redis_prefix;

        let index: Arc<dyn CacheIndex> = match policy {
            IndexPolicy::Local => Arc::new(LocalCacheIndex::new(key, directory, self.config.sketch_width)),
            IndexPolicy::Lru => Arc::new(SharedLruCacheIndex::new(key, prefix, Arc::clone(&self.store), directory)),
            IndexPolicy::Slru => Arc::new(
                SharedSlruCacheIndex::new(key, prefix, Arc::clone(&self.store), directory)
                    .with_factors(self.config.probation_factor, self.config.protected_factor)?,
            ),
        };
        index.set_max_weight(credentials.cache.max_size);
        crate::metrics::set_partition_max_weight(key, credentials.cache.max_size);

        let listener = Arc::new(FileDeletingListener::new(
            key,
            credentials.clone(),
            Arc::clone(&self.locator),
            Arc::clone(&self.remover),
        ));
        index.add_eldest_removed_listener(listener.clone());
        let driver = EvictionDriver::spawn(&index, self.config.max_evict_count);

        info!(
            partition = %key,
            policy = policy.as_str(),
            max_weight = credentials.cache.max_size,
            path = %credentials.cache.path.display(),
            "Created cache partition"
        );

        Ok(Partition {
            index,
            driver,
            listener,
            policy,
        })
    }

    /// A cached artifact was served, addressed by repository path.
    #[instrument(skip(self))]
    pub async fn on_cache_accessed_path(&self, project_id: &str, repo_name: &str, full_path: &str) {
        match self.nodes.resolve(project_id, repo_name, full_path).await {
            Ok(Some(node)) => {
                self.on_cache_accessed(node.storage_key.as_deref(), &node.sha256, node.size)
                    .await;
            }
            Ok(None) => {
                debug!("Accessed node not found, ignoring");
            }
            Err(e) => {
                warn!(error = %e, "Failed to resolve accessed node");
                crate::metrics::record_resolve_failure();
            }
        }
    }

    /// A cached artifact was served.
    #[instrument(skip(self))]
    pub async fn on_cache_accessed(&self, storage_key: Option<&str>, sha256: &str, size: u64) {
        if !self.accepts(storage_key, sha256) {
            return;
        }
        let result = async {
            let partition = self.get_or_create(storage_key).await?;
            partition.index.put(sha256, size, None).await?;
            Ok::<_, CleanerError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "Failed to record cache access");
            crate::metrics::record_error(partition_key(storage_key), "put");
        }
    }

    /// The backing object was deleted out of band.
    #[instrument(skip(self))]
    pub async fn on_cache_deleted(&self, storage_key: Option<&str>, sha256: &str) {
        if !self.accepts(storage_key, sha256) {
            return;
        }
        let result = async {
            let partition = self.get_or_create(storage_key).await?;
            Ok::<_, CleanerError>(partition.index.remove(sha256).await?)
        }
        .await;

        match result {
            Ok(Some(weight)) => debug!(weight, "Removed deleted artifact from cache index"),
            Ok(None) => debug!("Deleted artifact was not indexed"),
            Err(e) => {
                warn!(error = %e, "Failed to remove deleted artifact from cache index");
                crate::metrics::record_error(partition_key(storage_key), "remove");
            }
        }
    }

    /// Inbound keys name files on disk; only hex digests get through.
    fn accepts(&self, storage_key: Option<&str>, sha256: &str) -> bool {
        if is_digest(sha256) {
            return true;
        }
        warn!(sha256 = %sha256, "Rejected cache key that is not a hex digest");
        crate::metrics::record_rejected_key(partition_key(storage_key));
        false
    }

    /// Re-read storage configuration and push budgets and credentials into
    /// existing partitions. Returns how many partitions were updated.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize, CleanerError> {
        let provider = &self.credentials;
        let mut all = retry("list_credentials", &RetryConfig::query(), move || provider.list_credentials()).await?;
        all.push(retry("default_credentials", &RetryConfig::query(), move || provider.default_credentials()).await?);

        let mut updated = 0;
        for credentials in all {
            let Some(partition) = self.partition(credentials.key.as_deref()) else {
                continue;
            };
            let key = credentials.partition().to_string();
            let max_size = credentials.cache.max_size;

            if partition.index.max_weight() != max_size {
                info!(
                    partition = %key,
                    old = partition.index.max_weight(),
                    new = max_size,
                    "Cache budget changed"
                );
            }
            partition.index.set_max_weight(max_size);
            if partition.index.directory().root() != credentials.cache.path.as_path() {
                info!(partition = %key, path = %credentials.cache.path.display(), "Cache root changed");
                partition
                    .index
                    .set_directory(CacheDirectory::new(credentials.cache.path.clone(), Arc::clone(&self.locator)));
            }
            partition.listener.update_credentials(credentials);
            crate::metrics::set_partition_max_weight(&key, max_size);
            self.report(&key, &partition).await;

            // A smaller budget may already be exceeded
            if partition.index.should_evict().await.unwrap_or(false) {
                partition.index.eviction_signal().release();
            }
            updated += 1;
        }

        debug!(updated, "Refreshed cache partitions");
        Ok(updated)
    }

    async fn report(&self, key: &str, partition: &Partition) {
        match (partition.index.weight().await, partition.index.count().await) {
            (Ok(weight), Ok(count)) => {
                crate::metrics::set_partition_weight(key, weight);
                crate::metrics::set_partition_entries(key, count);
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(partition = %key, error = %e, "Failed to read partition stats");
                crate::metrics::record_error(key, "stats");
            }
        }
    }

    /// Drop index entries whose cached file is gone, in every partition.
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> usize {
        let partitions: Vec<(String, Arc<Partition>)> = self
            .partitions
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut removed = 0;
        for (key, partition) in partitions {
            match partition.index.sync().await {
                Ok(n) => {
                    if n > 0 {
                        info!(partition = %key, removed = n, "Synced cache index with disk");
                    }
                    removed += n;
                }
                Err(e) => {
                    warn!(partition = %key, error = %e, "Cache index sync failed");
                    crate::metrics::record_error(&key, "sync");
                }
            }
        }
        removed
    }

    /// Refresh every `refresh_interval_secs` until `shutdown` flips to
    /// `true` (or its sender is dropped), then stop all drivers.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        let mut refresh_interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = period.as_secs(), "Cache cleaner running");

        loop {
            tokio::select! {
                _ = refresh_interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "Cache refresh failed");
                        crate::metrics::record_error(DEFAULT_PARTITION, "refresh");
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Stop every partition's eviction driver.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let partitions: Vec<Arc<Partition>> = self.partitions.iter().map(|e| Arc::clone(e.value())).collect();
        for partition in partitions {
            partition.driver.shutdown().await;
        }
        info!("Cache cleaner stopped");
    }
}

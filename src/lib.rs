// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Storage Cache Index
//!
//! Weight-bounded eviction for on-disk caches of content-addressed artifacts.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CacheCleaner                          │
//! │  • on_cache_accessed / on_cache_deleted events              │
//! │  • one partition per storage profile, created lazily        │
//! │  • periodic budget + credential refresh                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CacheIndex (per partition)                 │
//! │  • LocalCacheIndex:      in-process, frequency admission    │
//! │  • SharedLruCacheIndex:  one queue in a SharedStore         │
//! │  • SharedSlruCacheIndex: probation + protected queues       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ over budget → signal
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                EvictionDriver (per partition)               │
//! │  • bounded evict_eldest() rounds                            │
//! │  • listeners delete the evicted file                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shared indices keep their state in Redis and change it only through Lua
//! transactions, so any number of server instances can share one cache
//! footprint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use storage_cache_index::{
//!     CacheCleaner, CacheCleanerConfig, CollaboratorError, FsCacheFileRemover, NodeLocation,
//!     NodeResolver, StaticCredentialsProvider, StorageCredentials,
//! };
//! use tokio::sync::watch;
//!
//! struct Nodes;
//!
//! #[async_trait]
//! impl NodeResolver for Nodes {
//!     async fn resolve(&self, _: &str, _: &str, _: &str) -> Result<Option<NodeLocation>, CollaboratorError> {
//!         Ok(None)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CacheCleanerConfig {
//!         redis_url: Some("redis://localhost:6379".into()),
//!         ..Default::default()
//!     };
//!     let credentials = Arc::new(StaticCredentialsProvider::new(StorageCredentials::new(
//!         None,
//!         "/data/cache",
//!         10 * 1024 * 1024 * 1024,
//!     )));
//!
//!     let cleaner = Arc::new(
//!         CacheCleaner::connect(config, credentials, Arc::new(Nodes), Arc::new(FsCacheFileRemover))
//!             .await
//!             .expect("Failed to connect"),
//!     );
//!
//!     cleaner.on_cache_accessed(None, "3a7bd3e2360a3d29eea436fcfb7e44c735d117c4", 4096).await;
//!
//!     let (_tx, rx) = watch::channel(false);
//!     cleaner.run(rx).await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`index`]: the [`CacheIndex`] contract and its three implementations
//! - [`store`]: shared state stores (Redis, in-process)
//! - [`eviction`]: eviction signal and per-partition driver
//! - [`cleaner`]: partition registry, events, file-deleting listener
//! - [`locator`]: content-addressed file placement
//! - [`resilience`]: retry with backoff

pub mod config;
pub mod index;
pub mod store;
pub mod eviction;
pub mod cleaner;
pub mod locator;
pub mod resilience;
pub mod metrics;

pub use config::{CacheCleanerConfig, IndexPolicy};
pub use index::{
    CacheIndex, EldestRemovedListener, IndexError, ListenerError, LocalCacheIndex, SegmentBudget,
    SharedLruCacheIndex, SharedSlruCacheIndex,
};
pub use store::{MemoryIndexStore, RedisIndexStore, SharedStore};
pub use eviction::{run_round, EvictionDriver, EvictionSignal, RoundOutcome, MAX_EVICT_COUNT};
pub use cleaner::{
    CacheCleaner, CacheFileRemover, CacheProperties, CleanerError, CollaboratorError, CredentialsProvider,
    FileDeletingListener, FsCacheFileRemover, NodeLocation, NodeResolver, Partition, StaticCredentialsProvider,
    StorageCredentials, DEFAULT_PARTITION,
};
pub use locator::{is_digest, CacheDirectory, FileLocator, HashFileLocator};
pub use resilience::retry::RetryConfig;

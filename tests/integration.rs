//! Integration tests against a real Redis.
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Run all integration tests (requires Docker)
//! cargo test --test integration -- --ignored
//!
//! # Run only SLRU tests
//! cargo test --test integration slru -- --ignored
//! ```
//!
//! Every test uses a unique key prefix, so they can share a server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;

use storage_cache_index::{
    CacheCleaner, CacheCleanerConfig, CacheDirectory, CacheIndex, CollaboratorError, EldestRemovedListener,
    FsCacheFileRemover, IndexError, IndexPolicy, ListenerError, NodeLocation, NodeResolver, RedisIndexStore,
    SharedLruCacheIndex, SharedSlruCacheIndex, SharedStore, StaticCredentialsProvider, StorageCredentials,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

// =============================================================================
// Container Helpers
// =============================================================================

/// Create a Redis container with health check
fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

fn redis_url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

async fn connect(url: &str) -> Arc<RedisIndexStore> {
    Arc::new(RedisIndexStore::connect(url).await.expect("Failed to connect to Redis"))
}

fn unique_prefix(name: &str) -> String {
    format!("test:{}:{}:", name, uuid::Uuid::new_v4())
}

fn directory() -> CacheDirectory {
    CacheDirectory::hashed("/nonexistent")
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl EldestRemovedListener for Recorder {
    async fn on_eldest_removed(&self, key: &str, weight: u64) -> Result<(), ListenerError> {
        self.seen.lock().push((key.to_string(), weight));
        Ok(())
    }
}

struct NoNodes;

#[async_trait]
impl NodeResolver for NoNodes {
    async fn resolve(&self, _: &str, _: &str, _: &str) -> Result<Option<NodeLocation>, CollaboratorError> {
        Ok(None)
    }
}

// =============================================================================
// Shared LRU
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn lru_evicts_eldest_on_overflow() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis)).await;

    let index = SharedLruCacheIndex::new("lru", &unique_prefix("lru"), store, directory());
    let recorder = Arc::new(Recorder::default());
    index.add_eldest_removed_listener(recorder.clone());
    index.set_max_weight(100);

    index.put("A", 40, Some(1.0)).await.unwrap();
    index.put("B", 40, Some(2.0)).await.unwrap();
    index.put("C", 40, Some(3.0)).await.unwrap();
    assert!(index.should_evict().await.unwrap());

    assert_eq!(index.evict_eldest().await.unwrap(), Some(("A".to_string(), 40)));
    assert_eq!(index.weight().await.unwrap(), 80);
    assert_eq!(index.count().await.unwrap(), 2);
    assert!(!index.should_evict().await.unwrap());
    assert_eq!(recorder.seen.lock().clone(), vec![("A".to_string(), 40)]);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lru_update_applies_weight_delta() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis)).await;

    let index = SharedLruCacheIndex::new("lru", &unique_prefix("delta"), store, directory());
    assert_eq!(index.put("a", 10, None).await.unwrap(), None);
    assert_eq!(index.put("a", 25, None).await.unwrap(), Some(10));
    assert_eq!(index.put("b", 5, None).await.unwrap(), None);
    assert_eq!(index.weight().await.unwrap(), 30);

    assert_eq!(index.remove("a").await.unwrap(), Some(25));
    assert_eq!(index.remove("a").await.unwrap(), None);
    assert_eq!(index.weight().await.unwrap(), 5);
    assert_eq!(index.get("missing").await.unwrap(), None);
    assert_eq!(index.count().await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lru_instances_share_one_partition() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let prefix = unique_prefix("shared");

    // Two "servers", each with its own connection
    let first = SharedLruCacheIndex::new("p", &prefix, connect(&url).await, directory());
    let second = SharedLruCacheIndex::new("p", &prefix, connect(&url).await, directory());
    first.set_max_weight(50);
    second.set_max_weight(50);

    first.put("x", 30, Some(1.0)).await.unwrap();
    second.put("y", 30, Some(2.0)).await.unwrap();
    assert_eq!(first.weight().await.unwrap(), 60);
    assert!(second.should_evict().await.unwrap());

    assert_eq!(second.evict_eldest().await.unwrap(), Some(("x".to_string(), 30)));
    assert!(!first.contains_key("x").await.unwrap());
    assert_eq!(first.weight().await.unwrap(), 30);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn lru_concurrent_writers_keep_weight_consistent() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let url = redis_url(&redis);
    let prefix = unique_prefix("concurrent");

    let mut tasks = Vec::new();
    for worker in 0..4 {
        let index = Arc::new(SharedLruCacheIndex::new("p", &prefix, connect(&url).await, directory()));
        tasks.push(tokio::spawn(async move {
            for i in 0..50u64 {
                let key = format!("k{}", i % 20);
                index.put(&key, worker * 10 + i % 7, None).await.unwrap();
                if i % 5 == 0 {
                    index.evict_eldest().await.unwrap();
                }
                if i % 9 == 0 {
                    index.remove(&format!("k{}", (i + 3) % 20)).await.unwrap();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Weight counter equals the sum of stored values
    let store = connect(&url).await;
    let index = SharedLruCacheIndex::new("p", &prefix, store.clone(), directory());
    let mut conn = store.connection();
    let values: Vec<u64> = conn.hvals(&index.keys().values).await.unwrap();
    assert_eq!(index.weight().await.unwrap(), values.iter().sum::<u64>());
    assert_eq!(index.count().await.unwrap(), values.len() as u64);

    let queued = store.hash_fields(&index.keys().values).await.unwrap().len();
    let members: u64 = conn.zcard(&index.keys().lru).await.unwrap();
    assert_eq!(queued as u64, members);
}

// =============================================================================
// Shared SLRU
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn slru_second_touch_promotes() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis)).await;

    let index = SharedSlruCacheIndex::new("slru", &unique_prefix("promote"), store, directory());
    index.put("K", 30, None).await.unwrap();
    assert!(index.in_probation("K").await.unwrap());

    assert_eq!(index.get("K").await.unwrap(), Some(30));
    assert!(index.in_protected("K").await.unwrap());
    assert!(!index.in_probation("K").await.unwrap());
    assert_eq!(index.protected_weight().await.unwrap(), 30);
    assert_eq!(index.probation_weight().await.unwrap(), 0);

    // Re-put while protected stays protected, with the new weight
    assert_eq!(index.put("K", 35, None).await.unwrap(), Some(30));
    assert_eq!(index.protected_weight().await.unwrap(), 35);
    assert_eq!(index.weight().await.unwrap(), 35);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn slru_demotes_before_deleting() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis)).await;

    let index = SharedSlruCacheIndex::new("slru", &unique_prefix("demote"), store, directory());
    let recorder = Arc::new(Recorder::default());
    index.add_eldest_removed_listener(recorder.clone());
    index.set_max_weight(100);

    // X and Y promoted (90 protected > 80), Z waits in probation
    for (key, score) in [("X", 1.0), ("Y", 2.0)] {
        index.put(key, 45, Some(score)).await.unwrap();
        index.get(key).await.unwrap();
    }
    index.put("Z", 30, Some(3.0)).await.unwrap();
    assert_eq!(index.protected_weight().await.unwrap(), 90);
    assert_eq!(index.probation_weight().await.unwrap(), 30);

    let evicted = index.evict_eldest().await.unwrap();
    assert_eq!(evicted, Some(("Z".to_string(), 30)));
    assert!(index.in_probation("X").await.unwrap());
    assert!(index.in_protected("Y").await.unwrap());
    assert_eq!(index.protected_weight().await.unwrap(), 45);
    assert_eq!(index.probation_weight().await.unwrap(), 45);
    assert_eq!(index.count().await.unwrap(), 2);
    assert_eq!(recorder.seen.lock().clone(), vec![("Z".to_string(), 30)]);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn slru_within_budget_eviction_is_noop() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let store = connect(&redis_url(&redis)).await;

    let index = SharedSlruCacheIndex::new("slru", &unique_prefix("noop"), store, directory());
    index.set_max_weight(100);
    index.put("a", 10, None).await.unwrap();
    index.put("b", 10, None).await.unwrap();

    assert_eq!(index.evict_eldest().await.unwrap(), None);
    assert_eq!(index.count().await.unwrap(), 2);
    assert_eq!(index.weight().await.unwrap(), 20);
}

// =============================================================================
// Cleaner
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn cleaner_connects_and_evicts_through_redis() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let dir = tempfile::tempdir().unwrap();

    let cache = CacheDirectory::hashed(dir.path());
    for digest in ["aa11", "bb22", "cc33"] {
        let path = cache.path_of(digest);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; 40]).unwrap();
    }

    let config = CacheCleanerConfig {
        redis_url: Some(redis_url(&redis)),
        redis_prefix: unique_prefix("cleaner"),
        policy: IndexPolicy::Lru,
        ..Default::default()
    };
    let credentials = Arc::new(StaticCredentialsProvider::new(StorageCredentials::new(None, dir.path(), 100)));
    let cleaner = CacheCleaner::connect(config, credentials, Arc::new(NoNodes), Arc::new(FsCacheFileRemover))
        .await
        .unwrap();

    for digest in ["aa11", "bb22", "cc33"] {
        cleaner.on_cache_accessed(None, digest, 40).await;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let mut evicted = false;
    for _ in 0..200 {
        if !cache.path_of("aa11").exists() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(evicted, "eldest file should be deleted");
    assert!(cache.path_of("cc33").exists());

    let index = cleaner.index(None).unwrap();
    assert!(index.weight().await.unwrap() <= 100);
    cleaner.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn failure_unreachable_redis_fails_fast() {
    let started = std::time::Instant::now();
    let result = RedisIndexStore::connect("redis://127.0.0.1:1").await;
    assert!(matches!(result, Err(IndexError::Store(_))));
    assert!(started.elapsed() < Duration::from_secs(30));
}

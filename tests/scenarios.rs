//! End-to-end scenarios against the in-process store.
//!
//! Same transactions as Redis, no Docker needed.
//!
//! Run with: `cargo test --test scenarios`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use storage_cache_index::{
    CacheCleaner, CacheCleanerConfig, CacheDirectory, CacheFileRemover, CacheIndex, CollaboratorError,
    EldestRemovedListener, FsCacheFileRemover, IndexPolicy, ListenerError, LocalCacheIndex, MemoryIndexStore,
    NodeLocation, NodeResolver, SharedLruCacheIndex, SharedSlruCacheIndex, StaticCredentialsProvider,
    StorageCredentials,
};

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
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

/// Counts deletions, then delegates to the filesystem.
#[derive(Default)]
struct CountingRemover {
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheFileRemover for CountingRemover {
    async fn delete_cache_file(
        &self,
        path: &str,
        sha256: &str,
        credentials: &StorageCredentials,
    ) -> Result<(), CollaboratorError> {
        self.deleted.lock().push(sha256.to_string());
        FsCacheFileRemover.delete_cache_file(path, sha256, credentials).await
    }
}

/// Resolves `/<name>` in any repository to the digest of `<name>`.
struct DigestNodes;

#[async_trait]
impl NodeResolver for DigestNodes {
    async fn resolve(
        &self,
        _project_id: &str,
        _repo_name: &str,
        full_path: &str,
    ) -> Result<Option<NodeLocation>, CollaboratorError> {
        if full_path.ends_with('/') {
            return Ok(None);
        }
        let name = full_path.trim_start_matches('/');
        Ok(Some(NodeLocation {
            storage_key: None,
            sha256: sha256_hex(name.as_bytes()),
            size: name.len() as u64,
        }))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write `content` into the cache at its content address, returning the digest.
fn write_cached(root: &Path, content: &[u8]) -> String {
    let digest = sha256_hex(content);
    let path = CacheDirectory::hashed(root).path_of(&digest);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    digest
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn weight_reaches(index: &Arc<dyn CacheIndex>, target: u64) -> bool {
    eventually(|| {
        let index = index.clone();
        async move { index.weight().await.unwrap() == target }
    })
    .await
}

async fn deletions_reach(remover: &Arc<CountingRemover>, target: usize) -> bool {
    eventually(|| {
        let remover = remover.clone();
        async move { remover.deleted.lock().len() == target }
    })
    .await
}

fn cleaner(policy: IndexPolicy, root: &Path, max_size: i64, remover: Arc<CountingRemover>) -> CacheCleaner {
    let credentials = Arc::new(StaticCredentialsProvider::new(StorageCredentials::new(None, root, max_size)));
    let config = CacheCleanerConfig {
        policy,
        ..Default::default()
    };
    CacheCleaner::new(config, Arc::new(MemoryIndexStore::new()), credentials, Arc::new(DigestNodes), remover)
}

// =============================================================================
// Index scenarios
// =============================================================================

#[tokio::test]
async fn lru_overflow_evicts_eldest() {
    let index = SharedLruCacheIndex::new(
        "default",
        "",
        Arc::new(MemoryIndexStore::new()),
        CacheDirectory::hashed("/nonexistent"),
    );
    let recorder = Arc::new(Recorder::default());
    index.add_eldest_removed_listener(recorder.clone());
    index.set_max_weight(100);

    index.put("A", 40, Some(1.0)).await.unwrap();
    index.put("B", 40, Some(2.0)).await.unwrap();
    index.put("C", 40, Some(3.0)).await.unwrap();
    assert_eq!(index.weight().await.unwrap(), 120);

    let outcome = storage_cache_index::run_round(&index, 1000).await.unwrap();
    assert_eq!(outcome.evicted, 1);
    assert_eq!(index.weight().await.unwrap(), 80);
    assert_eq!(index.count().await.unwrap(), 2);
    assert_eq!(recorder.seen.lock().as_slice(), &[("A".to_string(), 40)]);
}

#[tokio::test]
async fn slru_second_touch_promotes() {
    let index = SharedSlruCacheIndex::new(
        "default",
        "",
        Arc::new(MemoryIndexStore::new()),
        CacheDirectory::hashed("/nonexistent"),
    );
    index.set_max_weight(100);
    assert_eq!(index.budget().probation_max, 20);
    assert_eq!(index.budget().protected_max, 80);

    index.put("X", 15, None).await.unwrap();
    assert!(index.in_probation("X").await.unwrap());
    assert_eq!(index.probation_weight().await.unwrap(), 15);

    index.get("X").await.unwrap();
    assert!(index.in_protected("X").await.unwrap());
    assert_eq!(index.protected_weight().await.unwrap(), 15);
    assert_eq!(index.probation_weight().await.unwrap(), 0);
}

#[tokio::test]
async fn slru_under_budget_eviction_is_noop() {
    let index = SharedSlruCacheIndex::new(
        "default",
        "",
        Arc::new(MemoryIndexStore::new()),
        CacheDirectory::hashed("/nonexistent"),
    );
    let recorder = Arc::new(Recorder::default());
    index.add_eldest_removed_listener(recorder.clone());
    index.set_max_weight(100);

    index.put("A", 10, None).await.unwrap();
    index.put("B", 10, None).await.unwrap();

    assert_eq!(index.evict_eldest().await.unwrap(), None);
    assert_eq!(index.count().await.unwrap(), 2);
    assert!(recorder.seen.lock().is_empty());
}

#[tokio::test]
async fn sync_drops_entries_without_files() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryIndexStore::new());
    let directory = CacheDirectory::hashed(tmp.path());

    let a = write_cached(tmp.path(), b"artifact A");
    let b = sha256_hex(b"artifact B");
    let c = write_cached(tmp.path(), b"artifact C");

    let indices: Vec<Box<dyn CacheIndex>> = vec![
        Box::new(LocalCacheIndex::new("local", directory.clone(), 64)),
        Box::new(SharedLruCacheIndex::new("lru", "", store.clone(), directory.clone())),
        Box::new(SharedSlruCacheIndex::new("slru", "", store.clone(), directory.clone())),
    ];

    for index in &indices {
        for key in [&a, &b, &c] {
            index.put(key, 10, None).await.unwrap();
        }
        assert_eq!(index.sync().await.unwrap(), 1, "{}", index.name());
        assert!(!index.contains_key(&b).await.unwrap());
        assert!(index.contains_key(&a).await.unwrap());
        assert_eq!(index.sync().await.unwrap(), 0, "{}", index.name());
        assert_eq!(index.weight().await.unwrap(), 20);
    }
}

// =============================================================================
// Cleaner scenarios
// =============================================================================

#[tokio::test]
async fn cleaner_delete_of_unknown_key_fires_nothing() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let remover = Arc::new(CountingRemover::default());
    let cleaner = cleaner(IndexPolicy::Slru, tmp.path(), 100, remover.clone());

    cleaner.on_cache_deleted(Some("default"), "abc123").await;

    let index = cleaner.index(None).unwrap();
    assert_eq!(index.count().await.unwrap(), 0);
    assert!(remover.deleted.lock().is_empty());
    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_evicts_and_deletes_files() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let remover = Arc::new(CountingRemover::default());
    let cleaner = cleaner(IndexPolicy::Lru, tmp.path(), 100, remover.clone());

    let contents: Vec<Vec<u8>> = (0..3).map(|i| vec![b'a' + i as u8; 40]).collect();
    let digests: Vec<String> = contents.iter().map(|c| write_cached(tmp.path(), c)).collect();

    for digest in &digests {
        cleaner.on_cache_accessed(None, digest, 40).await;
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let index = cleaner.index(None).unwrap();
    assert!(weight_reaches(&index, 80).await);
    assert!(deletions_reach(&remover, 1).await);

    let evicted = remover.deleted.lock()[0].clone();
    assert_eq!(evicted, digests[0]);
    assert!(!CacheDirectory::hashed(tmp.path()).path_of(&evicted).exists());
    assert!(!index.contains_key(&evicted).await.unwrap());
    assert!(CacheDirectory::hashed(tmp.path()).path_of(&digests[2]).exists());

    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_accessed_by_path_tracks_node() {
    let tmp = tempfile::tempdir().unwrap();
    let cleaner = cleaner(IndexPolicy::Slru, tmp.path(), 1000, Arc::new(CountingRemover::default()));

    cleaner.on_cache_accessed_path("proj", "repo", "/readme.txt").await;
    cleaner.on_cache_accessed_path("proj", "repo", "/readme.txt").await;
    cleaner.on_cache_accessed_path("proj", "repo", "/folder/").await;

    let index = cleaner.index(None).unwrap();
    assert_eq!(index.count().await.unwrap(), 1);
    assert_eq!(index.weight().await.unwrap(), "readme.txt".len() as u64);
    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_refresh_shrinks_budget_and_evicts() {
    init_tracing();
    let tmp = tempfile::tempdir().unwrap();
    let remover = Arc::new(CountingRemover::default());
    let credentials = Arc::new(StaticCredentialsProvider::new(StorageCredentials::new(None, tmp.path(), 1000)));
    let cleaner = CacheCleaner::new(
        CacheCleanerConfig {
            policy: IndexPolicy::Lru,
            ..Default::default()
        },
        Arc::new(MemoryIndexStore::new()),
        credentials.clone(),
        Arc::new(DigestNodes),
        remover.clone(),
    );

    for i in 0..5u8 {
        let digest = write_cached(tmp.path(), &[i; 16]);
        cleaner.on_cache_accessed(None, &digest, 100).await;
    }
    let index = cleaner.index(None).unwrap();
    assert_eq!(index.weight().await.unwrap(), 500);

    credentials.upsert(StorageCredentials::new(None, tmp.path(), 250));
    assert_eq!(cleaner.refresh().await.unwrap(), 1);

    assert!(weight_reaches(&index, 200).await);
    assert!(deletions_reach(&remover, 3).await);
    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_creates_one_partition_under_concurrency() {
    let tmp = tempfile::tempdir().unwrap();
    let cleaner = Arc::new(cleaner(IndexPolicy::Slru, tmp.path(), 0, Arc::new(CountingRemover::default())));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let cleaner = cleaner.clone();
            tokio::spawn(async move {
                cleaner.on_cache_accessed(None, &format!("{:04x}", i), 1).await;
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cleaner.partition_count(), 1);
    assert_eq!(cleaner.index(None).unwrap().count().await.unwrap(), 16);
    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_sync_all_repairs_drift() {
    let tmp = tempfile::tempdir().unwrap();
    let cleaner = cleaner(IndexPolicy::Slru, tmp.path(), 0, Arc::new(CountingRemover::default()));

    let kept = write_cached(tmp.path(), b"kept");
    let gone = write_cached(tmp.path(), b"gone");
    cleaner.on_cache_accessed(None, &kept, 4).await;
    cleaner.on_cache_accessed(None, &gone, 4).await;
    std::fs::remove_file(CacheDirectory::hashed(tmp.path()).path_of(&gone)).unwrap();

    assert_eq!(cleaner.sync_all().await, 1);
    assert_eq!(cleaner.sync_all().await, 0);
    cleaner.shutdown().await;
}

#[tokio::test]
async fn cleaner_refresh_repoints_sync_at_new_root() {
    for policy in [IndexPolicy::Local, IndexPolicy::Lru, IndexPolicy::Slru] {
        let old_root = tempfile::tempdir().unwrap();
        let new_root = tempfile::tempdir().unwrap();
        let credentials = Arc::new(StaticCredentialsProvider::new(StorageCredentials::new(None, old_root.path(), 0)));
        let cleaner = CacheCleaner::new(
            CacheCleanerConfig {
                policy,
                ..Default::default()
            },
            Arc::new(MemoryIndexStore::new()),
            credentials.clone(),
            Arc::new(DigestNodes),
            Arc::new(CountingRemover::default()),
        );

        let stale = write_cached(old_root.path(), b"stale");
        cleaner.on_cache_accessed(None, &stale, 5).await;

        credentials.upsert(StorageCredentials::new(None, new_root.path(), 0));
        assert_eq!(cleaner.refresh().await.unwrap(), 1);
        let index = cleaner.index(None).unwrap();
        assert_eq!(index.directory().root(), new_root.path());

        let moved = write_cached(new_root.path(), b"moved");
        cleaner.on_cache_accessed(None, &moved, 5).await;

        // Only the entry without a file under the new root goes
        assert_eq!(cleaner.sync_all().await, 1, "{:?}", policy);
        assert!(index.contains_key(&moved).await.unwrap());
        assert!(!index.contains_key(&stale).await.unwrap());
        cleaner.shutdown().await;
    }
}

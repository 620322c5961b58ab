// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content-addressed placement of cached files.
//!
//! A digest `abcdef…` lives at `<root>/ab/cd/abcdef…`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Whether `key` can name a cached file: a non-empty run of hex digits.
///
/// Keys become path segments, so anything else is refused before it
/// reaches an index.
pub fn is_digest(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Maps a content digest to the directory (relative, `/`-delimited) holding it.
pub trait FileLocator: Send + Sync {
    fn locate(&self, digest: &str) -> String;
}

/// Two-level fan-out on the first four hex characters of the digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashFileLocator;

impl FileLocator for HashFileLocator {
    fn locate(&self, digest: &str) -> String {
        match (digest.get(0..2), digest.get(2..4)) {
            (Some(a), Some(b)) => format!("/{}/{}/", a, b),
            _ => "/".to_string(),
        }
    }
}

/// Cache root plus locator: where a partition's files physically live.
#[derive(Clone)]
pub struct CacheDirectory {
    root: PathBuf,
    locator: Arc<dyn FileLocator>,
}

impl CacheDirectory {
    pub fn new(root: impl Into<PathBuf>, locator: Arc<dyn FileLocator>) -> Self {
        Self {
            root: root.into(),
            locator,
        }
    }

    /// Directory laid out by [`HashFileLocator`].
    pub fn hashed(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(HashFileLocator))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, digest: &str) -> PathBuf {
        let located = self.locator.locate(digest);
        let mut path = self.root.clone();
        for segment in located.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.push(digest);
        path
    }

    /// Whether the cached file for `digest` exists as a regular file.
    pub async fn exists(&self, digest: &str) -> std::io::Result<bool> {
        match tokio::fs::metadata(self.path_of(digest)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for CacheDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheDirectory")
            .field("root", &self.root)
            .finish()
    }
}

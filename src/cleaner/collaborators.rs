// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Interfaces to the systems around the cleaner: node metadata, storage
//! credentials and physical file removal.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

use crate::config::IndexPolicy;

/// Partition key used for the default storage credentials.
pub const DEFAULT_PARTITION: &str = "default";

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("No storage credentials for key '{0}'")]
    UnknownCredentials(String),
    #[error("Metadata lookup failed: {0}")]
    Lookup(String),
    #[error("Refusing cache path segment '{0}'")]
    InvalidPath(String),
    #[error("Failed to delete cache file {path}: {source}")]
    Delete {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Cache settings of one storage profile.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheProperties {
    /// Cache root on local disk.
    pub path: PathBuf,
    /// Weight budget in bytes; zero or negative disables eviction.
    pub max_size: i64,
    /// Overrides the configured default policy.
    pub policy: Option<IndexPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageCredentials {
    /// `None` for the default storage.
    pub key: Option<String>,
    pub cache: CacheProperties,
}

impl StorageCredentials {
    pub fn new(key: Option<&str>, path: impl Into<PathBuf>, max_size: i64) -> Self {
        Self {
            key: key.map(str::to_string),
            cache: CacheProperties {
                path: path.into(),
                max_size,
                policy: None,
            },
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: IndexPolicy) -> Self {
        self.cache.policy = Some(policy);
        self
    }

    /// Partition key these credentials govern.
    pub fn partition(&self) -> &str {
        partition_key(self.key.as_deref())
    }
}

/// `None` maps to [`DEFAULT_PARTITION`].
pub fn partition_key(storage_key: Option<&str>) -> &str {
    storage_key.unwrap_or(DEFAULT_PARTITION)
}

/// Where an artifact's content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLocation {
    pub storage_key: Option<String>,
    pub sha256: String,
    pub size: u64,
}

/// Resolves repository paths to content fingerprints.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// `Ok(None)` when the node does not exist or is a folder.
    async fn resolve(
        &self,
        project_id: &str,
        repo_name: &str,
        full_path: &str,
    ) -> Result<Option<NodeLocation>, CollaboratorError>;
}

/// Read-only view of storage configuration.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn list_credentials(&self) -> Result<Vec<StorageCredentials>, CollaboratorError>;

    async fn default_credentials(&self) -> Result<StorageCredentials, CollaboratorError>;

    /// Credentials for a partition; `None` and `"default"` mean the default.
    async fn find_credentials(&self, storage_key: Option<&str>) -> Result<StorageCredentials, CollaboratorError> {
        match storage_key {
            None | Some(DEFAULT_PARTITION) => self.default_credentials().await,
            Some(key) => self
                .list_credentials()
                .await?
                .into_iter()
                .find(|c| c.key.as_deref() == Some(key))
                .ok_or_else(|| CollaboratorError::UnknownCredentials(key.to_string())),
        }
    }
}

/// Deletes a cached file.
#[async_trait]
pub trait CacheFileRemover: Send + Sync {
    /// `path` is the located directory (`/ab/cd/`), relative to the cache root
    /// in `credentials`.
    async fn delete_cache_file(
        &self,
        path: &str,
        sha256: &str,
        credentials: &StorageCredentials,
    ) -> Result<(), CollaboratorError>;
}

/// Removes files from the local cache directory. A file that is already
/// gone counts as deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsCacheFileRemover;

impl FsCacheFileRemover {
    /// `<cache.path><path><sha256>`. Every segment must be a plain name, so
    /// the result never leaves the cache root.
    pub fn resolve(path: &str, sha256: &str, credentials: &StorageCredentials) -> Result<PathBuf, CollaboratorError> {
        let mut file = credentials.cache.path.clone();
        for segment in path.split('/').filter(|s| !s.is_empty()).chain(std::iter::once(sha256)) {
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(name)), None) if name == segment => file.push(segment),
                _ => return Err(CollaboratorError::InvalidPath(segment.to_string())),
            }
        }
        Ok(file)
    }
}

#[async_trait]
impl CacheFileRemover for FsCacheFileRemover {
    async fn delete_cache_file(
        &self,
        path: &str,
        sha256: &str,
        credentials: &StorageCredentials,
    ) -> Result<(), CollaboratorError> {
        let file = Self::resolve(path, sha256, credentials)?;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {
                debug!(file = %file.display(), "Deleted cache file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(file = %file.display(), "Cache file already gone");
                Ok(())
            }
            Err(e) => Err(CollaboratorError::Delete {
                path: file.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Fixed credential set, editable at runtime.
pub struct StaticCredentialsProvider {
    default: RwLock<StorageCredentials>,
    others: RwLock<Vec<StorageCredentials>>,
}

impl StaticCredentialsProvider {
    pub fn new(default: StorageCredentials) -> Self {
        Self {
            default: RwLock::new(default),
            others: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace credentials, matched by key (`None` replaces the default).
    pub fn upsert(&self, credentials: StorageCredentials) {
        if credentials.key.is_none() {
            *self.default.write() = credentials;
            return;
        }
        let mut others = self.others.write();
        match others.iter_mut().find(|c| c.key == credentials.key) {
            Some(existing) => *existing = credentials,
            None => others.push(credentials),
        }
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentialsProvider {
    async fn list_credentials(&self) -> Result<Vec<StorageCredentials>, CollaboratorError> {
        Ok(self.others.read().clone())
    }

    async fn default_credentials(&self) -> Result<StorageCredentials, CollaboratorError> {
        Ok(self.default.read().clone())
    }
}

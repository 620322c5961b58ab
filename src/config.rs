// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the cache cleaner.
//!
//! # Example
//!
//! ```
//! use storage_cache_index::{CacheCleanerConfig, IndexPolicy};
//!
//! // Minimal config (uses defaults)
//! let config = CacheCleanerConfig::default();
//! assert_eq!(config.policy, IndexPolicy::Slru);
//! assert_eq!(config.max_evict_count, 1000);
//!
//! // Shared LRU on a namespaced Redis
//! let config = CacheCleanerConfig {
//!     redis_url: Some("redis://localhost:6379".into()),
//!     redis_prefix: "bkrepo:cache:".into(),
//!     policy: IndexPolicy::Lru,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;

use crate::index::{IndexError, SegmentBudget};

/// Which [`CacheIndex`](crate::CacheIndex) implementation backs a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexPolicy {
    /// In-process LRU with frequency admission; no sharing between instances.
    Local,
    /// Shared single-region LRU.
    Lru,
    /// Shared segmented LRU.
    #[default]
    Slru,
}

impl IndexPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPolicy::Local => "local",
            IndexPolicy::Lru => "lru",
            IndexPolicy::Slru => "slru",
        }
    }

    pub fn is_shared(&self) -> bool {
        !matches!(self, IndexPolicy::Local)
    }
}

/// Cache cleaner configuration.
///
/// All fields have defaults. Without `redis_url`, shared policies run on an
/// in-process store, which only coordinates indices within this process.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheCleanerConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prepended to every partition's affinity token
    #[serde(default)]
    pub redis_prefix: String,

    /// Policy for partitions whose cache settings name none
    #[serde(default)]
    pub policy: IndexPolicy,

    /// Upper bound on evictions per driver round
    #[serde(default = "default_max_evict_count")]
    pub max_evict_count: usize,

    /// Capacity/credential refresh period
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// SLRU probation share of the budget
    #[serde(default = "default_probation_factor")]
    pub probation_factor: f64,

    /// SLRU protected share of the budget
    #[serde(default = "default_protected_factor")]
    pub protected_factor: f64,

    /// Frequency sketch width for local indices
    #[serde(default = "default_sketch_width")]
    pub sketch_width: usize,
}

fn default_max_evict_count() -> usize { 1000 }
fn default_refresh_interval_secs() -> u64 { 300 } // 5 minutes
fn default_probation_factor() -> f64 { 0.2 }
fn default_protected_factor() -> f64 { 0.8 }
fn default_sketch_width() -> usize { 1024 }

impl Default for CacheCleanerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_prefix: String::new(),
            policy: IndexPolicy::default(),
            max_evict_count: default_max_evict_count(),
            refresh_interval_secs: default_refresh_interval_secs(),
            probation_factor: default_probation_factor(),
            protected_factor: default_protected_factor(),
            sketch_width: default_sketch_width(),
        }
    }
}

impl CacheCleanerConfig {
    /// Reject settings no partition could run with.
    pub fn validate(&self) -> Result<(), IndexError> {
        SegmentBudget::check_factors(self.probation_factor, self.protected_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheCleanerConfig::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.refresh_interval_secs, 300);
        assert_eq!(config.probation_factor, 0.2);
        assert_eq!(config.protected_factor, 0.8);
        assert_eq!(config.sketch_width, 1024);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: CacheCleanerConfig = serde_json::from_str(
            r#"{"redis_url": "redis://cache:6379", "policy": "lru", "max_evict_count": 50}"#,
        )
        .unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.policy, IndexPolicy::Lru);
        assert_eq!(config.max_evict_count, 50);
        assert_eq!(config.refresh_interval_secs, 300);
    }

    #[test]
    fn test_policy_names() {
        let policy: IndexPolicy = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(policy, IndexPolicy::Local);
        assert!(!policy.is_shared());
        assert!(IndexPolicy::Slru.is_shared());
        assert_eq!(IndexPolicy::Slru.as_str(), "slru");
        assert!(serde_json::from_str::<IndexPolicy>(r#""lfu""#).is_err());
    }

    #[test]
    fn test_validate_rejects_overlapping_factors() {
        assert!(CacheCleanerConfig::default().validate().is_ok());

        let config: CacheCleanerConfig =
            serde_json::from_str(r#"{"probation_factor": 0.5, "protected_factor": 0.8}"#).unwrap();
        assert!(matches!(config.validate(), Err(IndexError::InvalidFactors { .. })));
    }
}

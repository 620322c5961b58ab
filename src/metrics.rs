// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the cache index.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host process chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `storage_cache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_bytes` suffix for byte quantities
//!
//! # Labels
//! - `partition`: storage credentials key (`default` for the default storage)
//! - `operation`: put, remove, evict, refresh, ...

use metrics::{counter, gauge, histogram};

/// Record an index mutation
pub fn record_operation(partition: &str, operation: &str) {
    counter!(
        "storage_cache_operations_total",
        "partition" => partition.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record entries removed by eviction or admission rejection
pub fn record_eviction(partition: &str, count: usize, bytes: u64) {
    counter!(
        "storage_cache_evictions_total",
        "partition" => partition.to_string()
    )
    .increment(count as u64);
    counter!(
        "storage_cache_evicted_bytes_total",
        "partition" => partition.to_string()
    )
    .increment(bytes);
}

/// Record a protected → probation demotion
pub fn record_demotion(partition: &str) {
    counter!(
        "storage_cache_demotions_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record a finished eviction round
pub fn record_eviction_round(partition: &str, steps: usize, capped: bool) {
    counter!(
        "storage_cache_eviction_rounds_total",
        "partition" => partition.to_string()
    )
    .increment(1);
    histogram!(
        "storage_cache_eviction_round_steps",
        "partition" => partition.to_string()
    )
    .record(steps as f64);
    if capped {
        counter!(
            "storage_cache_eviction_rounds_capped_total",
            "partition" => partition.to_string()
        )
        .increment(1);
    }
}

/// Record an eldest-removed listener failure
pub fn record_listener_failure(partition: &str) {
    counter!(
        "storage_cache_listener_failures_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TRACKING - Cache maintenance failures are non-fatal, so count them
// ═══════════════════════════════════════════════════════════════════════════

/// Record a swallowed cache-maintenance error
pub fn record_error(partition: &str, operation: &str) {
    counter!(
        "storage_cache_errors_total",
        "partition" => partition.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a failed node lookup. The partition is unknown until the node
/// resolves, so this carries no partition label.
pub fn record_resolve_failure() {
    counter!("storage_cache_resolve_failures_total").increment(1);
}

/// Record an inbound key rejected before it reached an index
pub fn record_rejected_key(partition: &str) {
    counter!(
        "storage_cache_rejected_keys_total",
        "partition" => partition.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PARTITION STATE - Refreshed by the cleaner
// ═══════════════════════════════════════════════════════════════════════════

/// Set tracked weight of a partition in bytes
pub fn set_partition_weight(partition: &str, bytes: u64) {
    gauge!(
        "storage_cache_partition_weight_bytes",
        "partition" => partition.to_string()
    )
    .set(bytes as f64);
}

/// Set entry count of a partition
pub fn set_partition_entries(partition: &str, count: u64) {
    gauge!(
        "storage_cache_partition_entries",
        "partition" => partition.to_string()
    )
    .set(count as f64);
}

/// Set weight budget of a partition (0 or less means unbounded)
pub fn set_partition_max_weight(partition: &str, bytes: i64) {
    gauge!(
        "storage_cache_partition_max_weight_bytes",
        "partition" => partition.to_string()
    )
    .set(bytes as f64);
}

/// Set number of live partitions
pub fn set_partitions(count: usize) {
    gauge!("storage_cache_partitions").set(count as f64);
}

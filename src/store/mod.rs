// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared state stores for the LRU and segmented-LRU indices.
//!
//! # Layout
//!
//! Each partition owns a handful of collections, all named under one
//! affinity token `prefix{partition}`:
//!
//! ```text
//! LRU:   {p}:lru                         sorted set (key → recency)
//!        {p}:values                      hash       (key → weight)
//!        {p}:total_weight                counter
//!
//! SLRU:  {p}:slru:protected_lru          sorted set
//!        {p}:slru:protected_values       hash
//!        {p}:slru:total_weight_protected counter
//!        {p}:slru:probation_lru          sorted set
//!        {p}:slru:probation_values       hash
//!        {p}:slru:total_weight_probation counter
//!        {p}:slru:total_weight           counter
//! ```
//!
//! # Backends
//!
//! - [`RedisIndexStore`]: Lua scripts over a `ConnectionManager`
//! - [`MemoryIndexStore`]: same transactions in process, for single-node
//!   deployments and tests

pub mod memory;
pub mod redis;
pub mod traits;
pub mod zset;

pub use memory::MemoryIndexStore;
pub use redis::RedisIndexStore;
pub use traits::{affinity_token, LruKeys, SharedStore, SlruKeys};

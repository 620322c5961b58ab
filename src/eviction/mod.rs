// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Asynchronous eviction for cache indices.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Eviction Module                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  signal.rs   - EvictionSignal: cumulative wake-up permits    │
//! ├──────────────────────────────────────────────────────────────┤
//! │  driver.rs   - EvictionDriver: one tokio task per partition  │
//! │  └─ run_round(): bounded evict_eldest() loop                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Indices own their signal and release it from `put()` when the write left
//! the partition over budget. The driver owns the only waiter.

pub mod signal;
pub mod driver;

pub use signal::EvictionSignal;
pub use driver::{run_round, EvictionDriver, RoundOutcome, MAX_EVICT_COUNT};

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Count-min frequency sketch with periodic aging.
//!
//! Four rows of 4-bit counters (stored one per byte, saturating at 15).
//! After `10 × width` increments every counter is halved so that old
//! popularity fades and recent traffic dominates admission decisions.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

const DEPTH: usize = 4;
const MAX_COUNT: u8 = 15;
const SAMPLE_FACTOR: usize = 10;

const SEEDS: [u64; DEPTH] = [
    0xc3a5_c85c_97cb_3127,
    0xb492_b66f_be98_f273,
    0x9ae1_6a3b_2f90_404f,
    0xcbf2_9ce4_8422_2325,
];

#[derive(Debug, Clone)]
pub struct FrequencySketch {
    rows: Vec<Vec<u8>>,
    mask: usize,
    additions: usize,
    sample_size: usize,
}

impl FrequencySketch {
    /// `width` is rounded up to a power of two (minimum 16).
    pub fn new(width: usize) -> Self {
        let width = width.max(16).next_power_of_two();
        Self {
            rows: vec![vec![0u8; width]; DEPTH],
            mask: width - 1,
            additions: 0,
            sample_size: width * SAMPLE_FACTOR,
        }
    }

    pub fn width(&self) -> usize {
        self.mask + 1
    }

    /// Estimated number of recent occurrences of `key` (0..=15).
    pub fn frequency(&self, key: &str) -> u8 {
        let hash = hash_key(key);
        (0..DEPTH)
            .map(|row| self.rows[row][self.slot(hash, row)])
            .min()
            .unwrap_or(0)
    }

    pub fn increment(&mut self, key: &str) {
        let hash = hash_key(key);
        let mut bumped = false;
        for row in 0..DEPTH {
            let slot = self.slot(hash, row);
            let counter = &mut self.rows[row][slot];
            if *counter < MAX_COUNT {
                *counter += 1;
                bumped = true;
            }
        }
        if bumped {
            self.additions += 1;
            if self.additions >= self.sample_size {
                self.age();
            }
        }
    }

    /// Halve every counter.
    fn age(&mut self) {
        for row in &mut self.rows {
            for counter in row.iter_mut() {
                *counter >>= 1;
            }
        }
        self.additions /= 2;
    }

    #[inline]
    fn slot(&self, hash: u64, row: usize) -> usize {
        let mixed = (hash ^ SEEDS[row]).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        ((mixed >> 32) as usize ^ mixed as usize) & self.mask
    }
}

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

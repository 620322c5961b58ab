// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process sorted set with Redis ZSET ordering: by score, then by member.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Total-ordered `f64` wrapper.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct ZSet {
    scores: HashMap<String, Score>,
    ordered: BTreeSet<(Score, String)>,
}

impl ZSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or re-score `member`.
    pub fn add(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), Score(score)) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    pub fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.ordered.remove(&(old, member.to_string()));
                true
            }
            None => false,
        }
    }

    /// Lowest-scored member.
    pub fn first(&self) -> Option<&str> {
        self.ordered.iter().next().map(|(_, m)| m.as_str())
    }

    pub fn pop_first(&mut self) -> Option<String> {
        let (_, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some(member)
    }

}

#[cfg(test)]
impl ZSet {
    fn len(&self) -> usize {
        self.scores.len()
    }

    /// Members in eviction order.
    pub(crate) fn members(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|(_, m)| m.as_str())
    }
}

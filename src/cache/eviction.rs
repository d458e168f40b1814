//! Batch LRU eviction with hysteresis.
//!
//! Nothing is evicted until the store grows past the high-water mark
//! (120% of `max_size`). At that point the least-recently-accessed entries are
//! dropped in one pass until only the low-water mark (80%) remains, so the
//! sort is paid once per burst of inserts instead of on every insert.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use super::CacheEntry;

/// Capacity limits for a [`RequestCache`](super::RequestCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    max_size: usize,
}

impl EvictionPolicy {
    pub const fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Size above which an eviction pass runs.
    pub fn high_water(&self) -> usize {
        self.max_size * 6 / 5
    }

    /// Size an eviction pass shrinks the store down to.
    pub fn low_water(&self) -> usize {
        self.max_size * 4 / 5
    }

    /// Pick the keys to drop so that `entries` ends up at the low-water mark.
    ///
    /// Returns an empty list while the store is at or below the high-water mark.
    pub(crate) fn select_victims<V>(&self, entries: &HashMap<String, CacheEntry<V>>) -> Vec<String> {
        if entries.len() <= self.high_water() {
            return Vec::new();
        }
        let excess = entries.len() - self.low_water();

        let mut by_recency: Vec<(Instant, u64, &String)> = entries
            .iter()
            .map(|(key, entry)| (entry.last_accessed_at, entry.access_seq, key))
            .collect();
        by_recency.sort_unstable_by_key(|(at, seq, _)| (*at, *seq));

        by_recency
            .into_iter()
            .take(excess)
            .map(|(_, _, key)| key.clone())
            .collect()
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE)
    }
}

pub const DEFAULT_MAX_SIZE: usize = 200;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

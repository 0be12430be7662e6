//! Aggregate cache statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::cache::entry::CacheEntry;

/// A snapshot of cache occupancy and staleness at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Total number of tracked entries.
    pub total: usize,
    /// Number of entries stale as of the snapshot time.
    pub stale: usize,
    /// Entry count per tag.
    pub tag_counts: HashMap<String, usize>,
}

impl CacheStats {
    /// Entries that are not stale.
    pub fn fresh(&self) -> usize {
        self.total - self.stale
    }

    /// Percentage (0-100) of entries that are stale. `0` when empty.
    pub fn stale_pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.stale as f64 / self.total as f64
        }
    }

    /// Compute stats over a snapshot of entries as of `now`.
    pub fn from_entries<Id>(entries: &[CacheEntry<Id>], now: DateTime<Utc>) -> Self {
        let mut stats = CacheStats {
            total: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            if entry.is_stale(now) {
                stats.stale += 1;
            }
            for tag in &entry.tags {
                *stats.tag_counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        stats
    }
}

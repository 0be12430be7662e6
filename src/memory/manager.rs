//! Memory-pressure-driven eviction engine.
//!
//! A byte-budgeted, strategy-pluggable item tracker over arbitrary ids:
//! tracks last-use and access counts the way an idle-connection reaper
//! tracks its pool, but evicts by LRU, LFU, or size rather than just age.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::memory::pressure::{MemoryPressureHandler, PressureLevel, ThresholdMemoryPressureHandler};
use crate::memory::size::SizeEstimator;

/// Candidate ordering used when selecting eviction victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EvictionStrategy {
    /// Ascending `last_access`: oldest-accessed first.
    Lru,
    /// Ascending `access_count`, ties broken by ascending `last_access`.
    Lfu,
    /// Descending `size`, ties broken by ascending `last_access`.
    Size,
}

/// Tracking metadata for one item under management.
#[derive(Debug, Clone)]
struct TrackedItem {
    size: u64,
    last_access: DateTime<Utc>,
    access_count: u64,
}

/// Byte-accounting and pressure-level metrics, republished on every change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryMetrics {
    /// Sum of tracked item sizes.
    pub current_bytes: u64,
    /// Byte budget, if bounded.
    pub max_bytes: Option<u64>,
    /// Total number of items evicted over the manager's lifetime.
    pub eviction_count: u64,
    /// Number of pinned items.
    pub pinned_count: usize,
    /// Sum of pinned item sizes.
    pub pinned_bytes: u64,
    /// Number of tracked items.
    pub item_count: usize,
    /// Current pressure classification.
    pub pressure_level: PressureLevel,
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl MemoryMetrics {
    /// `current_bytes / max_bytes`, `0.0` when unbounded or empty.
    pub fn usage(&self) -> f64 {
        match self.max_bytes {
            Some(max) if max > 0 => self.current_bytes as f64 / max as f64,
            _ => 0.0,
        }
    }

    /// Bytes occupied by unpinned (evictable) items.
    pub fn unpinned_bytes(&self) -> u64 {
        self.current_bytes.saturating_sub(self.pinned_bytes)
    }

    /// Mean item size, `0.0` when no items are tracked.
    pub fn avg_size(&self) -> f64 {
        if self.item_count == 0 {
            0.0
        } else {
            self.current_bytes as f64 / self.item_count as f64
        }
    }
}

/// Configuration for a [`MemoryManager`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryConfig {
    /// Byte budget. `None` means unlimited.
    pub max_bytes: Option<u64>,
    /// Fraction of `max_bytes` at which pressure becomes `Moderate`.
    pub moderate_frac: f64,
    /// Fraction of `max_bytes` at which pressure becomes `Critical`.
    pub critical_frac: f64,
    /// Default eviction batch size for a moderate-pressure pass.
    pub batch: usize,
    /// Candidate ordering strategy.
    pub strategy: EvictionStrategy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            moderate_frac: 0.7,
            critical_frac: 0.9,
            batch: 16,
            strategy: EvictionStrategy::Lru,
        }
    }
}

impl MemoryConfig {
    /// Validate invariants: fractions in `(0, 1]` and ordered, batch > 0.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.moderate_frac) || !(0.0..=1.0).contains(&self.critical_frac) {
            return Err("moderate_frac and critical_frac must be within [0, 1]".to_string());
        }
        if self.moderate_frac > self.critical_frac {
            return Err("moderate_frac must not exceed critical_frac".to_string());
        }
        if self.batch == 0 {
            return Err("batch must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Tracks per-item size/access metadata for an arbitrary id space and
/// evicts under a pluggable strategy when a byte budget is exceeded.
pub struct MemoryManager<Id: Eq + std::hash::Hash + Clone + Ord> {
    config: MemoryConfig,
    items: Mutex<HashMap<Id, TrackedItem>>,
    pinned: Mutex<HashSet<Id>>,
    current_bytes: Mutex<u64>,
    eviction_count: Mutex<u64>,
    pressure: Arc<dyn MemoryPressureHandler>,
    on_eviction: Mutex<Option<Box<dyn Fn(&[Id]) + Send + Sync>>>,
}

impl<Id: Eq + std::hash::Hash + Clone + Ord + Send + Sync + 'static> MemoryManager<Id> {
    /// Construct a manager, deriving a [`ThresholdMemoryPressureHandler`]
    /// from `config`.
    pub fn new(config: MemoryConfig) -> Self {
        let pressure = Arc::new(ThresholdMemoryPressureHandler::new(
            config.max_bytes,
            config.moderate_frac,
            config.critical_frac,
        ));
        Self {
            config,
            items: Mutex::new(HashMap::new()),
            pinned: Mutex::new(HashSet::new()),
            current_bytes: Mutex::new(0),
            eviction_count: Mutex::new(0),
            pressure,
            on_eviction: Mutex::new(None),
        }
    }

    /// Register a callback invoked with the ids evicted by each eviction
    /// pass.
    pub fn set_on_eviction(&self, f: impl Fn(&[Id]) + Send + Sync + 'static) {
        *self.on_eviction.lock() = Some(Box::new(f));
    }

    /// Subscribe to pressure-level changes.
    pub fn pressure_stream(&self) -> tokio::sync::watch::Receiver<PressureLevel> {
        self.pressure.subscribe()
    }

    /// Record (or re-record) an item, sizing it via `estimator`. Returns
    /// the ids evicted as a side effect of crossing the moderate pressure
    /// threshold, if any.
    pub fn record_item<T>(&self, id: Id, value: &T, estimator: &dyn SizeEstimator<T>, now: DateTime<Utc>) -> Vec<Id> {
        let size = estimator.estimate(value);
        {
            let mut items = self.items.lock();
            let mut bytes = self.current_bytes.lock();
            match items.get_mut(&id) {
                Some(existing) => {
                    *bytes = bytes.saturating_sub(existing.size).saturating_add(size);
                    existing.size = size;
                    existing.last_access = now;
                    existing.access_count += 1;
                }
                None => {
                    *bytes = bytes.saturating_add(size);
                    items.insert(
                        id.clone(),
                        TrackedItem {
                            size,
                            last_access: now,
                            access_count: 1,
                        },
                    );
                }
            }
        }
        self.publish_and_maybe_evict()
    }

    /// Bump access bookkeeping for `id`. No-op for unknown ids.
    pub fn record_access(&self, id: &Id, now: DateTime<Utc>) {
        if let Some(item) = self.items.lock().get_mut(id) {
            item.last_access = now;
            item.access_count += 1;
        }
    }

    /// Stop tracking `id`, subtracting its size and clearing any pin.
    pub fn remove_item(&self, id: &Id) {
        let mut items = self.items.lock();
        if let Some(item) = items.remove(id) {
            let mut bytes = self.current_bytes.lock();
            *bytes = bytes.saturating_sub(item.size);
        }
        drop(items);
        self.pinned.lock().remove(id);
        self.pressure.update(*self.current_bytes.lock());
    }

    /// Pin `id`, excluding it from eviction.
    pub fn pin(&self, id: Id) {
        self.pinned.lock().insert(id);
    }

    /// Unpin `id`, making it eligible for eviction again.
    pub fn unpin(&self, id: &Id) {
        self.pinned.lock().remove(id);
    }

    /// Current tracked byte total.
    pub fn current_bytes(&self) -> u64 {
        *self.current_bytes.lock()
    }

    /// Snapshot metrics as of `now`.
    pub fn metrics(&self, now: DateTime<Utc>) -> MemoryMetrics {
        let items = self.items.lock();
        let pinned = self.pinned.lock();
        let pinned_bytes = pinned.iter().filter_map(|id| items.get(id)).map(|i| i.size).sum();
        MemoryMetrics {
            current_bytes: self.current_bytes(),
            max_bytes: self.config.max_bytes,
            eviction_count: *self.eviction_count.lock(),
            pinned_count: pinned.len(),
            pinned_bytes,
            item_count: items.len(),
            pressure_level: self.pressure.level(),
            timestamp: now,
        }
    }

    /// Select and remove up to `count` unpinned candidates by strategy,
    /// invoking the eviction callback. Returns the evicted ids.
    pub fn evict(&self, count: usize) -> Vec<Id> {
        if count == 0 {
            return Vec::new();
        }
        let victims = {
            let items = self.items.lock();
            let pinned = self.pinned.lock();
            let mut candidates: Vec<(Id, TrackedItem)> = items
                .iter()
                .filter(|(id, _)| !pinned.contains(*id))
                .map(|(id, item)| (id.clone(), item.clone()))
                .collect();
            self.sort_candidates(&mut candidates);
            candidates.into_iter().take(count).map(|(id, _)| id).collect::<Vec<_>>()
        };
        self.remove_many(&victims);
        victims
    }

    /// Remove every unpinned item, regardless of count.
    pub fn evict_unpinned(&self) -> Vec<Id> {
        let victims: Vec<Id> = {
            let items = self.items.lock();
            let pinned = self.pinned.lock();
            items.keys().filter(|id| !pinned.contains(*id)).cloned().collect()
        };
        self.remove_many(&victims);
        victims
    }

    fn sort_candidates(&self, candidates: &mut [(Id, TrackedItem)]) {
        match self.config.strategy {
            EvictionStrategy::Lru => candidates.sort_by(|a, b| a.1.last_access.cmp(&b.1.last_access).then(a.0.cmp(&b.0))),
            EvictionStrategy::Lfu => candidates.sort_by(|a, b| {
                a.1.access_count
                    .cmp(&b.1.access_count)
                    .then(a.1.last_access.cmp(&b.1.last_access))
                    .then(a.0.cmp(&b.0))
            }),
            EvictionStrategy::Size => candidates.sort_by(|a, b| {
                b.1.size
                    .cmp(&a.1.size)
                    .then(a.1.last_access.cmp(&b.1.last_access))
                    .then(a.0.cmp(&b.0))
            }),
        }
    }

    fn remove_many(&self, ids: &[Id]) {
        if ids.is_empty() {
            return;
        }
        {
            let mut items = self.items.lock();
            let mut bytes = self.current_bytes.lock();
            for id in ids {
                if let Some(item) = items.remove(id) {
                    *bytes = bytes.saturating_sub(item.size);
                }
            }
        }
        *self.eviction_count.lock() += ids.len() as u64;
        self.pressure.update(*self.current_bytes.lock());
        if let Some(cb) = self.on_eviction.lock().as_ref() {
            cb(ids);
        }
    }

    fn publish_and_maybe_evict(&self) -> Vec<Id> {
        let bytes = self.current_bytes();
        let level = self.pressure.update(bytes);
        match level {
            PressureLevel::None => Vec::new(),
            PressureLevel::Moderate => self.evict(self.config.batch),
            PressureLevel::Critical => self.evict(self.config.batch * 2),
            PressureLevel::Emergency => self.evict_unpinned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::size::FixedSize;
    use chrono::Duration;

    fn cfg(max_bytes: u64, batch: usize, strategy: EvictionStrategy) -> MemoryConfig {
        MemoryConfig {
            max_bytes: Some(max_bytes),
            moderate_frac: 0.5,
            critical_frac: 0.8,
            batch,
            strategy,
        }
    }

    #[test]
    fn current_bytes_tracks_sum_of_sizes() {
        // Testable property 3.
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(1_000_000, 16, EvictionStrategy::Lru));
        let est = FixedSize(10);
        let now = Utc::now();
        manager.record_item(1, &(), &est, now);
        manager.record_item(2, &(), &est, now);
        assert_eq!(manager.current_bytes(), 20);
        manager.remove_item(&1);
        assert_eq!(manager.current_bytes(), 10);
    }

    #[test]
    fn lru_evicts_oldest_accessed_first() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(1_000_000, 16, EvictionStrategy::Lru));
        let est = FixedSize(1);
        let t0 = Utc::now();
        manager.record_item(1, &(), &est, t0);
        manager.record_item(2, &(), &est, t0 + Duration::seconds(1));
        manager.record_item(3, &(), &est, t0 + Duration::seconds(2));
        let evicted = manager.evict(1);
        assert_eq!(evicted, vec![1]);
    }

    #[test]
    fn lfu_evicts_least_accessed_ties_by_last_access() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(1_000_000, 16, EvictionStrategy::Lfu));
        let est = FixedSize(1);
        let t0 = Utc::now();
        manager.record_item(1, &(), &est, t0);
        manager.record_access(&1, t0 + Duration::seconds(1));
        manager.record_item(2, &(), &est, t0);
        let evicted = manager.evict(1);
        assert_eq!(evicted, vec![2]);
    }

    #[test]
    fn size_strategy_evicts_largest_first() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(1_000_000, 16, EvictionStrategy::Size));
        let t0 = Utc::now();
        manager.record_item(1, &(), &FixedSize(5), t0);
        manager.record_item(2, &(), &FixedSize(50), t0);
        let evicted = manager.evict(1);
        assert_eq!(evicted, vec![2]);
    }

    #[test]
    fn pinned_items_are_never_selected() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(1_000_000, 16, EvictionStrategy::Lru));
        let est = FixedSize(1);
        let t0 = Utc::now();
        manager.record_item(1, &(), &est, t0);
        manager.pin(1);
        let evicted = manager.evict(5);
        assert!(evicted.is_empty());
    }

    #[test]
    fn crossing_moderate_threshold_triggers_a_batch_eviction() {
        let manager: MemoryManager<u32> = MemoryManager::new(MemoryConfig {
            max_bytes: Some(100),
            moderate_frac: 0.5,
            critical_frac: 0.9,
            batch: 1,
            strategy: EvictionStrategy::Lru,
        });
        let t0 = Utc::now();
        manager.record_item(1, &(), &FixedSize(40), t0);
        let evicted = manager.record_item(2, &(), &FixedSize(40), t0 + Duration::seconds(1));
        // current_bytes = 80, ratio 0.8 >= moderate (0.5) -> evict batch=1 oldest (id 1)
        assert_eq!(evicted, vec![1]);
    }

    #[test]
    fn emergency_pressure_evicts_all_unpinned() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(10, 1, EvictionStrategy::Lru));
        let t0 = Utc::now();
        manager.pin(1);
        manager.record_item(1, &(), &FixedSize(5), t0);
        let evicted = manager.record_item(2, &(), &FixedSize(10), t0 + Duration::seconds(1));
        assert_eq!(evicted, vec![2]);
        let metrics = manager.metrics(t0);
        assert_eq!(metrics.item_count, 1);
        assert_eq!(metrics.eviction_count, 1);
        assert_eq!(metrics.pinned_count, 1);
        assert_eq!(metrics.pinned_bytes, 5);
        assert_eq!(metrics.unpinned_bytes(), 0);
    }

    #[test]
    fn metrics_derived_fields() {
        let manager: MemoryManager<u32> = MemoryManager::new(cfg(100, 16, EvictionStrategy::Lru));
        let t0 = Utc::now();
        manager.record_item(1, &(), &FixedSize(20), t0);
        manager.record_item(2, &(), &FixedSize(30), t0);
        let metrics = manager.metrics(t0);
        assert_eq!(metrics.current_bytes, 50);
        assert!((metrics.usage() - 0.5).abs() < f64::EPSILON);
        assert!((metrics.avg_size() - 25.0).abs() < f64::EPSILON);
    }
}

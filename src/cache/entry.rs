//! Per-id cache freshness metadata.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// Immutable per-id cache metadata: when it was cached, when (if ever) it
/// became stale, and which tags it carries.
///
/// All mutating operations return a modified copy rather than mutating in
/// place — callers (the tag index, the store facade) own replacing the
/// stored copy. Equality is by all fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<Id> {
    /// The entity id this entry describes.
    pub id: Id,
    /// When this entry was cached.
    pub cached_at: DateTime<Utc>,
    /// When this entry became (or will become) stale, if ever marked.
    pub stale_at: Option<DateTime<Utc>>,
    /// Tags currently associated with this entry.
    pub tags: HashSet<String>,
}

impl<Id: Clone> CacheEntry<Id> {
    /// Construct a freshly-cached entry with no staleness and no tags.
    pub fn new(id: Id, cached_at: DateTime<Utc>) -> Self {
        Self {
            id,
            cached_at,
            stale_at: None,
            tags: HashSet::new(),
        }
    }

    /// `stale_at` is present and has passed relative to `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.stale_at.map(|t| t <= now).unwrap_or(false)
    }

    /// Return a copy with `stale_at` set to `now`.
    pub fn mark_stale(&self, now: DateTime<Utc>) -> Self {
        self.copy_with(None, Some(Some(now)), None)
    }

    /// Return a structurally modified copy. `None` for a field leaves it
    /// unchanged; `stale_at` takes `Option<Option<_>>` so callers can
    /// explicitly clear it (`Some(None)`) versus leaving it alone (`None`).
    pub fn copy_with(
        &self,
        cached_at: Option<DateTime<Utc>>,
        stale_at: Option<Option<DateTime<Utc>>>,
        tags: Option<HashSet<String>>,
    ) -> Self {
        Self {
            id: self.id.clone(),
            cached_at: cached_at.unwrap_or(self.cached_at),
            stale_at: stale_at.unwrap_or(self.stale_at),
            tags: tags.unwrap_or_else(|| self.tags.clone()),
        }
    }

    /// Return a copy refreshed at `now`, clearing staleness — the effect
    /// of re-saving an item.
    pub fn refresh(&self, now: DateTime<Utc>) -> Self {
        self.copy_with(Some(now), Some(None), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn staleness_is_monotonic_once_marked() {
        // Testable property 2: if stale at t1 < t2, stale at t2 too.
        let t0 = Utc::now();
        let entry = CacheEntry::new(1u32, t0).mark_stale(t0);
        let t1 = t0 + Duration::seconds(1);
        let t2 = t1 + Duration::seconds(1);
        assert!(entry.is_stale(t1));
        assert!(entry.is_stale(t2));
    }

    #[test]
    fn unmarked_entry_is_never_stale() {
        let t0 = Utc::now();
        let entry = CacheEntry::new(1u32, t0);
        assert!(!entry.is_stale(t0 + Duration::days(1)));
    }

    #[test]
    fn refresh_clears_staleness() {
        let t0 = Utc::now();
        let entry = CacheEntry::new(1u32, t0).mark_stale(t0);
        let refreshed = entry.refresh(t0 + Duration::seconds(5));
        assert!(!refreshed.is_stale(t0 + Duration::seconds(10)));
    }

    #[test]
    fn equality_is_by_all_fields() {
        let t0 = Utc::now();
        let a = CacheEntry::new(1u32, t0);
        let b = CacheEntry::new(1u32, t0);
        assert_eq!(a, b);
        let c = a.mark_stale(t0);
        assert_ne!(a, c);
    }
}

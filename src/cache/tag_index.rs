//! Bidirectional tag↔id index with stale invalidation.
//!
//! Keeps a tag→ids index alongside each entry's own tag set, kept
//! consistent on every call. Invalidation marks matching entries stale
//! rather than removing them, so a caller can still serve a stale value
//! while a refresh is in flight.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::cache::entry::CacheEntry;
use crate::cache::stats::CacheStats;

/// A bidirectional tag↔id index over [`CacheEntry`] values.
///
/// Two mappings are maintained and kept consistent on every call:
/// `tag → set<id>` (`tag_to_ids`) and the entry's own `tags: set<string>`
/// field, which serves as the `id → set<string>` side.
pub struct CacheTagIndex<Id>
where
    Id: Eq + Hash + Clone + Debug + Ord + Send + Sync + 'static,
{
    entries: DashMap<Id, CacheEntry<Id>>,
    tag_to_ids: DashMap<String, HashSet<Id>>,
}

impl<Id> CacheTagIndex<Id>
where
    Id: Eq + Hash + Clone + Debug + Ord + Send + Sync + 'static,
{
    /// Construct an empty index.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            tag_to_ids: DashMap::new(),
        }
    }

    /// Insert or replace an entry, refreshing `cached_at` and clearing
    /// staleness the way re-saving an item does.
    pub fn save(&self, id: Id, now: DateTime<Utc>, tags: HashSet<String>) {
        for tag in &tags {
            self.tag_to_ids
                .entry(tag.clone())
                .or_default()
                .insert(id.clone());
        }
        let entry = CacheEntry::new(id.clone(), now).copy_with(None, None, Some(tags));
        self.entries.insert(id, entry);
    }

    /// Read a copy of an entry's metadata.
    pub fn get(&self, id: &Id) -> Option<CacheEntry<Id>> {
        self.entries.get(id).map(|e| e.clone())
    }

    /// Union tags into both the tag index and the entry's own tag set.
    /// A no-op if `id` is unknown.
    pub fn add_tags(&self, id: &Id, tags: &HashSet<String>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            for tag in tags {
                entry.tags.insert(tag.clone());
                self.tag_to_ids.entry(tag.clone()).or_default().insert(id.clone());
            }
        }
    }

    /// Set-difference tags from both the tag index and the entry's own
    /// tag set. A no-op if `id` is unknown.
    pub fn remove_tags(&self, id: &Id, tags: &HashSet<String>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            for tag in tags {
                entry.tags.remove(tag);
                if let Some(mut ids) = self.tag_to_ids.get_mut(tag) {
                    ids.remove(id);
                }
            }
        }
    }

    /// Purge `id` from every tag bucket and from the entry map entirely.
    pub fn remove_id(&self, id: &Id) {
        if let Some((_, entry)) = self.entries.remove(id) {
            for tag in &entry.tags {
                if let Some(mut ids) = self.tag_to_ids.get_mut(tag) {
                    ids.remove(id);
                }
            }
        }
    }

    /// All tags with at least one id, the entry's own view.
    pub fn tags_of(&self, id: &Id) -> HashSet<String> {
        self.entries.get(id).map(|e| e.tags.clone()).unwrap_or_default()
    }

    /// All ids currently tagged with `tag`.
    pub fn ids_of(&self, tag: &str) -> HashSet<Id> {
        self.tag_to_ids.get(tag).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Every non-empty tag bucket.
    pub fn all_tags(&self) -> HashSet<String> {
        self.tag_to_ids
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Every id currently tracked.
    pub fn all_ids(&self) -> HashSet<Id> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Union of id buckets across `tags`.
    pub fn by_any(&self, tags: &[String]) -> HashSet<Id> {
        let mut result = HashSet::new();
        for tag in tags {
            result.extend(self.ids_of(tag));
        }
        result
    }

    /// Intersection of id buckets across `tags`. An empty `tags` input
    /// yields an empty result, not "everything".
    pub fn by_all(&self, tags: &[String]) -> HashSet<Id> {
        let mut iter = tags.iter();
        let Some(first) = iter.next() else {
            return HashSet::new();
        };
        let mut result = self.ids_of(first);
        for tag in iter {
            let bucket = self.ids_of(tag);
            result.retain(|id| bucket.contains(id));
        }
        result
    }

    /// Mark every entry yielded by [`CacheTagIndex::by_any`] as stale.
    /// Does not remove tags or entries.
    pub fn invalidate_by_tags(&self, tags: &[String], now: DateTime<Utc>) {
        for id in self.by_any(tags) {
            self.invalidate_one(&id, now);
        }
    }

    /// Mark the given ids as stale directly.
    pub fn invalidate_by_ids(&self, ids: &[Id], now: DateTime<Utc>) {
        for id in ids {
            self.invalidate_one(id, now);
        }
    }

    fn invalidate_one(&self, id: &Id, now: DateTime<Utc>) {
        if let Some(mut entry) = self.entries.get_mut(id) {
            *entry = entry.mark_stale(now);
        }
    }

    /// Is the entry for `id` stale as of `now`? `false` for unknown ids.
    pub fn is_stale(&self, id: &Id, now: DateTime<Utc>) -> bool {
        self.entries.get(id).map(|e| e.is_stale(now)).unwrap_or(false)
    }

    /// Compute aggregate statistics over every tracked entry.
    pub fn stats(&self, now: DateTime<Utc>) -> CacheStats {
        let snapshot: Vec<CacheEntry<Id>> = self.entries.iter().map(|e| e.value().clone()).collect();
        CacheStats::from_entries(&snapshot, now)
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<Id> Default for CacheTagIndex<Id>
where
    Id: Eq + Hash + Clone + Debug + Ord + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tag_invalidation_marks_stale_not_removed() {
        let index: CacheTagIndex<&str> = CacheTagIndex::new();
        let now = Utc::now();
        index.save("u1", now, tags(&["premium", "team-a"]));
        index.save("u2", now, tags(&["team-a"]));

        index.invalidate_by_tags(&["team-a".to_string()], now);

        assert!(index.is_stale(&"u1", now));
        assert!(index.is_stale(&"u2", now));
        assert!(index.tags_of(&"u1").contains("premium"));
        // Invalidation doesn't remove the entry or its tags.
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn bidirectional_consistency_holds_through_add_remove() {
        // Testable property 1.
        let index: CacheTagIndex<u32> = CacheTagIndex::new();
        let now = Utc::now();
        index.save(1, now, HashSet::new());
        index.add_tags(&1, &tags(&["a", "b"]));
        assert!(index.tags_of(&1).contains("a"));
        assert!(index.ids_of("a").contains(&1));

        index.remove_tags(&1, &tags(&["a"]));
        assert!(!index.tags_of(&1).contains("a"));
        assert!(!index.ids_of("a").contains(&1));
        assert!(index.tags_of(&1).contains("b"));
        assert!(index.ids_of("b").contains(&1));
    }

    #[test]
    fn remove_id_purges_every_bucket() {
        let index: CacheTagIndex<u32> = CacheTagIndex::new();
        let now = Utc::now();
        index.save(1, now, tags(&["a", "b"]));
        index.remove_id(&1);
        assert!(index.ids_of("a").is_empty());
        assert!(index.ids_of("b").is_empty());
        assert!(index.get(&1).is_none());
    }

    #[test]
    fn by_all_is_intersection_empty_input_is_empty() {
        let index: CacheTagIndex<u32> = CacheTagIndex::new();
        let now = Utc::now();
        index.save(1, now, tags(&["a", "b"]));
        index.save(2, now, tags(&["a"]));

        let both = index.by_all(&["a".to_string(), "b".to_string()]);
        assert_eq!(both, HashSet::from([1]));

        let none: HashSet<u32> = index.by_all(&[]);
        assert!(none.is_empty());
    }

    #[test]
    fn unknown_id_tag_ops_are_no_ops() {
        let index: CacheTagIndex<u32> = CacheTagIndex::new();
        index.add_tags(&999, &tags(&["a"]));
        index.remove_tags(&999, &tags(&["a"]));
        assert!(index.get(&999).is_none());
    }
}

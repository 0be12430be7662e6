//! Cursor-based pagination shared by every backend.
//!
//! [`Cursor`] is an opaque, round-trippable positional marker. The default
//! [`paginate`] implementation below is the fallback every backend that
//! doesn't natively paginate can use: materialize the full result list via
//! [`crate::query::evaluate`], then slice by numeric index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::FieldAccess;
use crate::query::{evaluate, Query, Value};

/// The reserved key used for index-based paging.
pub const INDEX_KEY: &str = "_index";

/// An opaque, round-trippable paging marker.
///
/// Internally a key-value map so backends with richer native cursors
/// (e.g. a CRDT backend pairing a Lamport clock with a row id) can store
/// more than one positional key; the default pagination helper only ever
/// reads/writes [`INDEX_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Cursor {
    fields: BTreeMap<String, String>,
}

impl Cursor {
    /// Construct a cursor from raw key/value pairs.
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self { fields }
    }

    /// Construct the default index-based cursor.
    pub fn from_index(index: usize) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(INDEX_KEY.to_string(), index.to_string());
        Self { fields }
    }

    /// Read the default index key, if present and parseable.
    pub fn index(&self) -> Option<usize> {
        self.fields.get(INDEX_KEY).and_then(|v| v.parse().ok())
    }

    /// Read an arbitrary positional key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Encode to an opaque string. Stable across calls for equal cursors.
    pub fn encode(&self) -> String {
        serde_json::to_string(&self.fields).expect("cursor fields are always serializable")
    }

    /// Decode from a string produced by [`Cursor::encode`].
    pub fn decode(encoded: &str) -> Option<Self> {
        serde_json::from_str(encoded).ok().map(Cursor::new)
    }
}

/// Paging metadata describing a [`PagedResult`]'s position within the
/// overall result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    /// Whether a subsequent page exists.
    pub has_next: bool,
    /// Whether a preceding page exists.
    pub has_prev: bool,
    /// Cursor pointing at the first item of this page, present iff the
    /// page is non-empty.
    pub start_cursor: Option<Cursor>,
    /// Cursor pointing just past the last item of this page, present iff
    /// `has_next`.
    pub end_cursor: Option<Cursor>,
    /// Total number of items in the underlying set, when known.
    pub total_count: Option<usize>,
}

/// A page of entities plus its [`PageInfo`].
#[derive(Debug, Clone)]
pub struct PagedResult<E> {
    /// The page's items.
    pub items: Vec<E>,
    /// Paging metadata.
    pub page_info: PageInfo,
}

/// Default pagination: materialize `items` filtered/ordered by `query`,
/// then slice by the query's `first_count`/`after_cursor` as a clamped
/// numeric range.
///
/// Backends that can paginate natively (e.g. pushing `LIMIT`/`OFFSET`
/// into SQL) should prefer doing so; this helper exists so every backend
/// has a correct, if less efficient, fallback.
pub fn paginate<E: FieldAccess + Clone>(items: &[E], query: &Query) -> PagedResult<E> {
    // `evaluate` would otherwise truncate to `limit`/`first_count` itself,
    // collapsing the set this function needs to slice over; pagination
    // owns that slice, so strip both before materializing the full
    // filtered/ordered list.
    let mut unpaged = query.clone();
    unpaged.limit = None;
    unpaged.first_count = None;
    let evaluated = evaluate(items, &unpaged);
    let len = evaluated.len();

    let start = query
        .after_cursor
        .as_ref()
        .and_then(Cursor::index)
        .unwrap_or(0)
        .min(len);

    let first_count = query.first_count.unwrap_or(len);
    let end = start.saturating_add(first_count).min(len);

    let page_items: Vec<E> = evaluated[start..end].to_vec();

    let has_next = end < len;
    let has_prev = start > 0;
    let start_cursor = if page_items.is_empty() {
        None
    } else {
        Some(Cursor::from_index(start))
    };
    let end_cursor = if has_next {
        Some(Cursor::from_index(end))
    } else {
        None
    };

    PagedResult {
        items: page_items,
        page_info: PageInfo {
            has_next,
            has_prev,
            start_cursor,
            end_cursor,
            total_count: Some(len),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Value;

    #[derive(Debug, Clone, PartialEq)]
    struct Item(u32);

    impl FieldAccess for Item {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "id" => Some(Value::Int(self.0 as i64)),
                _ => None,
            }
        }
    }

    fn items(n: u32) -> Vec<Item> {
        (0..n).map(Item).collect()
    }

    #[test]
    fn cursor_round_trips() {
        let c = Cursor::from_index(42);
        let encoded = c.encode();
        let decoded = Cursor::decode(&encoded).unwrap();
        assert_eq!(c, decoded);
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn first_page_has_next_no_prev() {
        let query = Query::new().order_by("id", false).first(3);
        let page = paginate(&items(10), &query);
        assert_eq!(page.items, vec![Item(0), Item(1), Item(2)]);
        assert!(page.page_info.has_next);
        assert!(!page.page_info.has_prev);
        assert_eq!(page.page_info.start_cursor, Some(Cursor::from_index(0)));
        assert_eq!(page.page_info.end_cursor, Some(Cursor::from_index(3)));
        assert_eq!(page.page_info.total_count, Some(10));
    }

    #[test]
    fn last_page_has_no_next() {
        let query = Query::new()
            .order_by("id", false)
            .after(Cursor::from_index(8))
            .first(3);
        let page = paginate(&items(10), &query);
        assert_eq!(page.items, vec![Item(8), Item(9)]);
        assert!(!page.page_info.has_next);
        assert!(page.page_info.has_prev);
        assert_eq!(page.page_info.end_cursor, None);
    }

    #[test]
    fn empty_page_has_no_start_cursor() {
        let query = Query::new().after(Cursor::from_index(100)).first(3);
        let page = paginate(&items(10), &query);
        assert!(page.items.is_empty());
        assert_eq!(page.page_info.start_cursor, None);
    }

    /// Iterating pages with `after = previous.end_cursor` visits every
    /// item exactly once.
    #[test]
    fn pagination_monotonicity_visits_every_item_once() {
        let all = items(23);
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let mut query = Query::new().order_by("id", false).first(5);
            if let Some(c) = cursor.clone() {
                query = query.after(c);
            }
            let page = paginate(&all, &query);
            seen.extend(page.items.iter().map(|i| i.0));
            if !page.page_info.has_next {
                break;
            }
            cursor = page.page_info.end_cursor;
        }
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
    }
}

//! Tag-indexed cache layer: per-entry freshness metadata and a
//! bidirectional tag↔id index over arbitrary entity ids.

pub mod entry;
pub mod stats;
pub mod tag_index;

pub use entry::CacheEntry;
pub use stats::CacheStats;
pub use tag_index::CacheTagIndex;

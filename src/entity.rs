//! Entity identification and field access traits.
//!
//! The core is generic over an opaque, host-defined entity type `E`. Hosts
//! supply an ID extraction rule by implementing [`Identifiable`]; the query
//! evaluator additionally needs a way to read named fields off an entity,
//! supplied via [`FieldAccess`].

use std::fmt::Debug;
use std::hash::Hash;

use crate::query::Value;

/// A type whose values can be uniquely identified.
///
/// IDs must be hashable and totally ordered so they can key the tag index
/// and the memory manager's tracking maps, and so query results can be
/// sorted deterministically when entity fields tie.
pub trait Identifiable {
    /// The entity's ID type.
    type Id: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;

    /// Extract this entity's ID.
    fn id(&self) -> Self::Id;
}

/// A type whose named fields can be read as [`Value`]s for query
/// evaluation. Optional: entities that are never queried need not
/// implement it.
pub trait FieldAccess {
    /// Read a named field, returning `None` if the field is absent or
    /// unknown.
    fn field(&self, name: &str) -> Option<Value>;
}

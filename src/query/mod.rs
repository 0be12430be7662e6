//! Query model, in-memory evaluator, and SQL translator.
//!
//! `Query` is an immutable builder describing filters, ordering, and
//! pagination intent. [`evaluator`] applies a `Query` to an in-memory
//! slice of entities; [`translator`] lowers the same `Query` into SQL
//! `WHERE`/`ORDER BY`/`LIMIT`/`OFFSET` text for SQL-style backends. Both
//! consumers share the same AST so a backend's behavior never drifts from
//! what the in-memory fallback would compute.

pub mod evaluator;
pub mod model;
pub mod translator;
pub mod value;

pub use evaluator::{evaluate, eval_expression, matches};
pub use model::{Expression, Operator, OrderBy, Query, QueryFilter};
pub use translator::{Dialect, FieldAliasMap, IdentityAliasMap, SqlFragment, SqlTranslator};
pub use value::Value;

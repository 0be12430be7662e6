//! # Nexus Store
//!
//! An entity-oriented data access core for client applications: a uniform
//! read/write/query/watch surface over a pluggable [`Backend`], with an
//! interceptor pipeline, a tag-indexed cache, memory-pressure-driven
//! eviction, an in-memory/SQL query model, and a reliability layer
//! (circuit breaker, degradation modes, health aggregation) sitting
//! between the two.
//!
//! ## Architecture
//!
//! - `entity`: [`Identifiable`]/[`FieldAccess`] — the traits a host entity
//!   type implements to plug into the rest of the crate
//! - `backend`: the [`Backend`] trait — the contract a storage adapter
//!   implements, plus [`InMemoryBackend`], a reference implementation
//! - `interceptor`: the ordered middleware pipeline wrapping every
//!   operation, with built-in logging/timing/validation/caching stages
//! - `cache`: the tag-indexed freshness metadata layer
//! - `memory`: size estimation, pressure levels, and the eviction engine
//! - `query`: the query builder, in-memory evaluator, and SQL translator
//! - `pagination`: cursor-based paging over query results
//! - `pending`: the pending-change ledger backing offline replay
//! - `policy`: [`WritePolicy`] and the handler dispatching save/delete
//!   across cache and network
//! - `reliability`: circuit breaker, degradation modes, health checks
//! - `metrics`: the [`MetricsReporter`] seam and the metric shapes it's
//!   fed
//! - `config`: per-subsystem configuration, aggregated in [`StoreConfig`]
//! - `store`: [`Store`], the facade wiring all of the above together
//! - `error`: [`StoreError`] and the crate-wide [`Result`] alias

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod interceptor;
pub mod memory;
pub mod metrics;
pub mod pagination;
pub mod pending;
pub mod policy;
pub mod query;
pub mod reliability;
pub mod store;
pub mod util;

pub use backend::{Backend, Capabilities, InMemoryBackend, SyncStatus};
pub use config::{ConfigError, StoreConfig};
pub use entity::{FieldAccess, Identifiable};
pub use error::{Result, StoreError};
pub use interceptor::{Interceptor, InterceptorChain, StoreOperation};
pub use pagination::{PagedResult, PageInfo};
pub use pending::{CancelAction, PendingChange, PendingChangeLedger, PendingOperation};
pub use policy::{WritePolicy, WritePolicyHandler};
pub use query::{Expression, Operator, OrderBy, Query, QueryFilter, Value};
pub use store::{Store, StoreInterceptors};

/// Crate version, as declared in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, as declared in `Cargo.toml`.
pub const NAME: &str = env!("CARGO_PKG_NAME");

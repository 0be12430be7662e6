//! The shared per-call context threaded through a chain execution.

use std::any::Any;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// The store operation an interceptor chain dispatches, used to select
/// which interceptors are "applicable" for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreOperation {
    /// Fetch a single entity.
    Get,
    /// Fetch a collection.
    GetAll,
    /// Persist a single entity.
    Save,
    /// Persist a batch of entities.
    SaveAll,
    /// Remove a single entity.
    Delete,
    /// Remove a batch of entities.
    DeleteAll,
    /// Subscribe to a single entity's changes.
    Watch,
    /// Subscribe to a collection's changes.
    WatchAll,
    /// Reconcile pending local changes with the backend.
    Sync,
}

impl StoreOperation {
    /// Whether this operation only observes data (`Get`/`GetAll`/`Watch`/`WatchAll`).
    pub fn is_read(self) -> bool {
        matches!(
            self,
            StoreOperation::Get | StoreOperation::GetAll | StoreOperation::Watch | StoreOperation::WatchAll
        )
    }

    /// Whether this operation mutates data (`Save`/`SaveAll`/`Delete`/`DeleteAll`).
    pub fn is_write(self) -> bool {
        matches!(
            self,
            StoreOperation::Save | StoreOperation::SaveAll | StoreOperation::Delete | StoreOperation::DeleteAll
        )
    }

    /// Whether this operation yields a stream rather than a single value.
    pub fn is_stream(self) -> bool {
        matches!(self, StoreOperation::Watch | StoreOperation::WatchAll)
    }

    /// Whether this operation removes data.
    pub fn is_delete(self) -> bool {
        matches!(self, StoreOperation::Delete | StoreOperation::DeleteAll)
    }

    /// Whether this operation is the backend reconciliation pass.
    pub fn is_sync(self) -> bool {
        matches!(self, StoreOperation::Sync)
    }

    /// Whether this operation changes what's stored, i.e. a write or a
    /// sync (which may apply queued writes).
    pub fn modifies_data(self) -> bool {
        self.is_write() || self.is_sync()
    }
}

/// The metadata bag shared by every interceptor that processes a given
/// call. The canonical cross-interceptor channel — e.g. timing's
/// stopwatch start, logging's start time.
#[derive(Default)]
pub struct Metadata {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Metadata {
    /// Construct an empty metadata bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, overwriting any prior value.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    /// Read a value of type `T` previously stored under `key`.
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Remove and return a value of type `T` previously stored under `key`.
    pub fn take<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.values.remove(key).and_then(|v| v.downcast::<T>().ok()).map(|b| *b)
    }
}

/// Per-call context threaded through one [`crate::interceptor::chain::InterceptorChain::execute`]
/// invocation. Concurrent `execute` calls get independent instances.
pub struct InterceptorContext<Req, Res> {
    /// Which operation is being dispatched.
    pub operation: StoreOperation,
    /// The request payload, observed by every interceptor in the forward
    /// phase.
    pub request: Req,
    /// The response, set either by a short-circuiting/providing
    /// interceptor or by the backend work function.
    pub response: Option<Res>,
    /// The shared metadata bag.
    pub metadata: Metadata,
}

impl<Req, Res> InterceptorContext<Req, Res> {
    /// Construct a context for a fresh call.
    pub fn new(operation: StoreOperation, request: Req) -> Self {
        Self {
            operation,
            request,
            response: None,
            metadata: Metadata::new(),
        }
    }
}

/// What an interceptor's `on_request` hook decided to do.
pub enum RequestOutcome<Res> {
    /// Proceed to the next interceptor (or the backend) unmodified.
    Continue,
    /// Proceed, but supply a response — later interceptors still observe
    /// the request, and the backend is not called.
    Provide(Res),
    /// Stop the forward phase here; later interceptors are not invoked,
    /// and the backend is not called.
    ShortCircuit(Res),
    /// Abort the call: run `on_error` reverse on already-processed
    /// interceptors, then propagate.
    Error(StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_categorization_predicates() {
        assert!(StoreOperation::Get.is_read());
        assert!(StoreOperation::WatchAll.is_read());
        assert!(StoreOperation::WatchAll.is_stream());
        assert!(StoreOperation::Save.is_write());
        assert!(StoreOperation::DeleteAll.is_delete());
        assert!(StoreOperation::Sync.is_sync());
        assert!(StoreOperation::Sync.modifies_data());
        assert!(StoreOperation::SaveAll.modifies_data());
        assert!(!StoreOperation::Get.modifies_data());
    }

    #[test]
    fn metadata_round_trips_typed_values() {
        let mut meta = Metadata::new();
        meta.set("start", 42u64);
        assert_eq!(meta.get::<u64>("start"), Some(&42));
        assert_eq!(meta.get::<String>("start"), None);
        assert_eq!(meta.take::<u64>("start"), Some(42));
        assert_eq!(meta.get::<u64>("start"), None);
    }
}

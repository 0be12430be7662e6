//! The backend contract — the seam to external storage engines (§6).
//!
//! Every store operation, after the interceptor chain's forward phase,
//! dispatches to a [`Backend`] implementation. The core ships no backend
//! of its own beyond [`InMemoryBackend`], which doubles as a reference
//! implementation and as the backend used by the store's own tests.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::entity::{FieldAccess, Identifiable};
use crate::error::{Result, StoreError};
use crate::pagination::{paginate, PagedResult};
use crate::pending::PendingChange;
use crate::query::{evaluate, Query};

/// Backend capability discovery — a flat bitset-style struct rather than
/// a trait hierarchy, so a store can ask "can this backend do X" without
/// downcasting (§9 design note: prefer capability sets over deep
/// inheritance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    /// Backend implements `get_all_paged`/`watch_all_paged` natively
    /// rather than relying on the default [`paginate`] helper.
    pub supports_pagination: bool,
    /// Backend can push live updates (`watch`/`watch_all`) rather than
    /// only ever emitting once.
    pub supports_realtime: bool,
    /// Backend supports CRDT changesets (`get_changeset`/`apply_changeset`).
    pub supports_changesets: bool,
}

impl Capabilities {
    /// No optional capability enabled.
    pub const fn none() -> Self {
        Self {
            supports_pagination: false,
            supports_realtime: false,
            supports_changesets: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::none()
    }
}

/// Backend synchronization state, as reported to callers interested in
/// whether local state matches the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SyncStatus {
    /// Local state matches the backend; nothing pending.
    Synced,
    /// A sync is in progress.
    Syncing,
    /// Local state has pending changes the backend hasn't seen yet.
    PendingChanges,
    /// The last sync attempt failed.
    Error,
}

/// The backend seam. Parameterized over an entity type `E` implementing
/// [`Identifiable`] + [`FieldAccess`]; `E::Id` is the id type threaded
/// through every per-entity operation.
///
/// Lifecycle: [`Backend::initialize`] must run before any other method;
/// implementations that receive a call first should return
/// `StoreError::State { current_state: "uninitialized", expected_state:
/// "initialized" }` rather than silently operating on unready state.
/// [`Backend::close`] releases resources and is idempotent.
#[async_trait]
pub trait Backend<E>: Send + Sync
where
    E: Identifiable + FieldAccess + Clone + Send + Sync + 'static,
    E::Id: Send + Sync,
{
    /// Bring the backend up (open a connection, create tables, ...).
    async fn initialize(&self) -> Result<()>;

    /// Release resources. Idempotent.
    async fn close(&self) -> Result<()>;

    /// What this backend can do beyond the required surface.
    fn capabilities(&self) -> Capabilities;

    /// Fetch a single entity by id.
    async fn get(&self, id: &E::Id) -> Result<Option<E>>;

    /// Fetch every entity matching `query` (or all, if `None`).
    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<E>>;

    /// Subscribe to a single entity's changes. The current value (or
    /// `None` if absent) is the first emission.
    async fn watch(&self, id: &E::Id) -> Result<watch::Receiver<Option<E>>>;

    /// Subscribe to a collection's changes. The current matching set is
    /// the first emission.
    async fn watch_all(&self, query: Option<&Query>) -> Result<watch::Receiver<Vec<E>>>;

    /// Persist one entity, returning the stored (possibly backend-enriched)
    /// value.
    async fn save(&self, value: E) -> Result<E>;

    /// Persist a batch, returning the stored values in the same order.
    async fn save_all(&self, values: Vec<E>) -> Result<Vec<E>>;

    /// Delete by id. Returns whether a row was actually removed.
    async fn delete(&self, id: &E::Id) -> Result<bool>;

    /// Delete a batch of ids, returning the number actually removed.
    async fn delete_all(&self, ids: &[E::Id]) -> Result<usize>;

    /// Delete every entity matching `query`, returning the number removed.
    async fn delete_where(&self, query: &Query) -> Result<usize>;

    /// Current sync state.
    async fn sync_status(&self) -> Result<SyncStatus>;

    /// Subscribe to sync state transitions.
    fn sync_status_stream(&self) -> watch::Receiver<SyncStatus>;

    /// Reconcile pending local changes with the backend.
    async fn sync(&self) -> Result<()>;

    /// Count of changes not yet acknowledged by the backend.
    async fn pending_changes_count(&self) -> Result<usize>;

    /// Page through `get_all` results. The default implementation falls
    /// back to [`paginate`] over the materialized [`Backend::get_all`]
    /// result; a backend advertising `capabilities().supports_pagination`
    /// should override this with a native `LIMIT`/`OFFSET` push-down.
    async fn get_all_paged(&self, query: Option<&Query>) -> Result<PagedResult<E>> {
        let items = self.get_all(query).await?;
        let query = query.cloned().unwrap_or_default();
        Ok(paginate(&items, &query))
    }

    /// Streaming counterpart of [`Backend::get_all_paged`]: the default
    /// implementation pages once over the current `watch_all` value and
    /// does not re-page on subsequent emissions — backends that support
    /// pagination natively are expected to override this.
    async fn watch_all_paged(&self, query: Option<&Query>) -> Result<PagedResult<E>> {
        let mut rx = self.watch_all(query).await?;
        let items = rx.borrow_and_update().clone();
        let query = query.cloned().unwrap_or_default();
        Ok(paginate(&items, &query))
    }

    /// Fetch a CRDT changeset since a prior marker. `None` for a full
    /// snapshot. Backends without CRDT support return
    /// `StoreError::State` with `current_state = "not_applicable"`.
    async fn get_changeset(&self, _since: Option<&str>) -> Result<Vec<u8>> {
        Err(StoreError::state("not_applicable", "crdt_backend"))
    }

    /// Apply a changeset previously produced by [`Backend::get_changeset`].
    async fn apply_changeset(&self, _changeset: &[u8]) -> Result<()> {
        Err(StoreError::state("not_applicable", "crdt_backend"))
    }

    /// This backend's replica identity, for CRDT backends.
    fn node_id(&self) -> Option<String> {
        None
    }

    /// Subscribe to the pending-change ledger's snapshots.
    fn pending_changes_stream(&self) -> watch::Receiver<Vec<PendingChange<E::Id, E>>>;

    /// Subscribe to conflicts detected while syncing.
    fn conflicts_stream(&self) -> watch::Receiver<Vec<E::Id>>;

    /// Retry a specific pending change.
    async fn retry_change(&self, id: &E::Id) -> Result<()>;

    /// Cancel a pending change, returning it if one existed.
    async fn cancel_change(&self, id: &E::Id) -> Result<Option<PendingChange<E::Id, E>>>;
}

/// Reference backend: an in-memory map, synchronously "synced" at all
/// times. Grounds every required method in something concrete and is
/// used by the store's own integration tests in place of a real SQLite
/// or CRDT adapter.
pub struct InMemoryBackend<E: Identifiable> {
    initialized: Mutex<bool>,
    items: Mutex<HashMap<E::Id, E>>,
    watchers: Mutex<HashMap<E::Id, watch::Sender<Option<E>>>>,
    collection: Arc<watch::Sender<Vec<E>>>,
    sync_status: Arc<watch::Sender<SyncStatus>>,
    pending: Arc<watch::Sender<Vec<PendingChange<E::Id, E>>>>,
    conflicts: Arc<watch::Sender<Vec<E::Id>>>,
}

impl<E> InMemoryBackend<E>
where
    E: Identifiable + FieldAccess + Clone + Send + Sync + 'static,
    E::Id: Hash + Send + Sync,
{
    /// Construct an empty, uninitialized backend.
    pub fn new() -> Self {
        let (collection_tx, _) = watch::channel(Vec::new());
        let (sync_tx, _) = watch::channel(SyncStatus::Synced);
        let (pending_tx, _) = watch::channel(Vec::new());
        let (conflicts_tx, _) = watch::channel(Vec::new());
        Self {
            initialized: Mutex::new(false),
            items: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            collection: Arc::new(collection_tx),
            sync_status: Arc::new(sync_tx),
            pending: Arc::new(pending_tx),
            conflicts: Arc::new(conflicts_tx),
        }
    }

    fn require_initialized(&self) -> Result<()> {
        if *self.initialized.lock() {
            Ok(())
        } else {
            Err(StoreError::state("uninitialized", "initialized"))
        }
    }

    fn publish_collection(&self, items: &HashMap<E::Id, E>) {
        let mut snapshot: Vec<E> = items.values().cloned().collect();
        snapshot.sort_by(|a, b| a.id().cmp(&b.id()));
        let _ = self.collection.send(snapshot);
    }

    fn notify_watcher(&self, id: &E::Id, value: Option<E>) {
        if let Some(tx) = self.watchers.lock().get(id) {
            let _ = tx.send(value);
        }
    }
}

impl<E> Default for InMemoryBackend<E>
where
    E: Identifiable + FieldAccess + Clone + Send + Sync + 'static,
    E::Id: Hash + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> Backend<E> for InMemoryBackend<E>
where
    E: Identifiable + FieldAccess + Clone + Send + Sync + 'static,
    E::Id: Hash + Send + Sync,
{
    async fn initialize(&self) -> Result<()> {
        *self.initialized.lock() = true;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.initialized.lock() = false;
        Ok(())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::none()
    }

    async fn get(&self, id: &E::Id) -> Result<Option<E>> {
        self.require_initialized()?;
        Ok(self.items.lock().get(id).cloned())
    }

    async fn get_all(&self, query: Option<&Query>) -> Result<Vec<E>> {
        self.require_initialized()?;
        let items: Vec<E> = self.items.lock().values().cloned().collect();
        Ok(match query {
            Some(query) => evaluate(&items, query),
            None => items,
        })
    }

    async fn watch(&self, id: &E::Id) -> Result<watch::Receiver<Option<E>>> {
        self.require_initialized()?;
        let current = self.items.lock().get(id).cloned();
        let mut watchers = self.watchers.lock();
        let rx = watchers
            .entry(id.clone())
            .or_insert_with(|| watch::channel(current.clone()).0)
            .subscribe();
        Ok(rx)
    }

    async fn watch_all(&self, _query: Option<&Query>) -> Result<watch::Receiver<Vec<E>>> {
        self.require_initialized()?;
        Ok(self.collection.subscribe())
    }

    async fn save(&self, value: E) -> Result<E> {
        self.require_initialized()?;
        let id = value.id();
        {
            let mut items = self.items.lock();
            items.insert(id.clone(), value.clone());
            self.publish_collection(&items);
        }
        self.notify_watcher(&id, Some(value.clone()));
        Ok(value)
    }

    async fn save_all(&self, values: Vec<E>) -> Result<Vec<E>> {
        self.require_initialized()?;
        {
            let mut items = self.items.lock();
            for value in &values {
                items.insert(value.id(), value.clone());
            }
            self.publish_collection(&items);
        }
        for value in &values {
            self.notify_watcher(&value.id(), Some(value.clone()));
        }
        Ok(values)
    }

    async fn delete(&self, id: &E::Id) -> Result<bool> {
        self.require_initialized()?;
        let removed = {
            let mut items = self.items.lock();
            let removed = items.remove(id).is_some();
            if removed {
                self.publish_collection(&items);
            }
            removed
        };
        if removed {
            self.notify_watcher(id, None);
        }
        Ok(removed)
    }

    async fn delete_all(&self, ids: &[E::Id]) -> Result<usize> {
        self.require_initialized()?;
        let mut count = 0;
        {
            let mut items = self.items.lock();
            for id in ids {
                if items.remove(id).is_some() {
                    count += 1;
                }
            }
            if count > 0 {
                self.publish_collection(&items);
            }
        }
        for id in ids {
            self.notify_watcher(id, None);
        }
        Ok(count)
    }

    async fn delete_where(&self, query: &Query) -> Result<usize> {
        self.require_initialized()?;
        let matching: Vec<E::Id> = {
            let items = self.items.lock();
            let all: Vec<E> = items.values().cloned().collect();
            evaluate(&all, query).into_iter().map(|e| e.id()).collect()
        };
        self.delete_all(&matching).await
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        self.require_initialized()?;
        Ok(*self.sync_status.borrow())
    }

    fn sync_status_stream(&self) -> watch::Receiver<SyncStatus> {
        self.sync_status.subscribe()
    }

    async fn sync(&self) -> Result<()> {
        self.require_initialized()?;
        let _ = self.sync_status.send(SyncStatus::Synced);
        Ok(())
    }

    async fn pending_changes_count(&self) -> Result<usize> {
        self.require_initialized()?;
        Ok(self.pending.borrow().len())
    }

    fn pending_changes_stream(&self) -> watch::Receiver<Vec<PendingChange<E::Id, E>>> {
        self.pending.subscribe()
    }

    fn conflicts_stream(&self) -> watch::Receiver<Vec<E::Id>> {
        self.conflicts.subscribe()
    }

    async fn retry_change(&self, _id: &E::Id) -> Result<()> {
        self.require_initialized()?;
        Ok(())
    }

    async fn cancel_change(&self, _id: &E::Id) -> Result<Option<PendingChange<E::Id, E>>> {
        self.require_initialized()?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Value;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Widget {
        id: u32,
        name: String,
    }

    impl Identifiable for Widget {
        type Id = u32;
        fn id(&self) -> u32 {
            self.id
        }
    }

    impl FieldAccess for Widget {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "name" => Some(Value::Text(self.name.clone())),
                _ => None,
            }
        }
    }

    fn widget(id: u32, name: &str) -> Widget {
        Widget {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn operations_before_initialize_yield_state_error() {
        let backend = InMemoryBackend::<Widget>::new();
        let err = backend.get(&1).await.unwrap_err();
        match err {
            StoreError::State { current_state, expected_state } => {
                assert_eq!(current_state, "uninitialized");
                assert_eq!(expected_state, "initialized");
            }
            other => panic!("expected State error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn save_then_get_round_trips() {
        let backend = InMemoryBackend::<Widget>::new();
        backend.initialize().await.unwrap();
        backend.save(widget(1, "gizmo")).await.unwrap();
        assert_eq!(backend.get(&1).await.unwrap(), Some(widget(1, "gizmo")));
    }

    #[tokio::test]
    async fn watch_emits_the_current_value_then_updates() {
        let backend = InMemoryBackend::<Widget>::new();
        backend.initialize().await.unwrap();
        backend.save(widget(1, "gizmo")).await.unwrap();
        let mut rx = backend.watch(&1).await.unwrap();
        assert_eq!(*rx.borrow(), Some(widget(1, "gizmo")));
        backend.save(widget(1, "widget")).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(widget(1, "widget")));
    }

    #[tokio::test]
    async fn delete_where_removes_matching_and_reports_count() {
        let backend = InMemoryBackend::<Widget>::new();
        backend.initialize().await.unwrap();
        backend.save_all(vec![widget(1, "a"), widget(2, "b"), widget(3, "a")]).await.unwrap();
        let query = Query::new().where_filter("name", crate::query::Operator::Eq, Value::Text("a".to_string()));
        let removed = backend.delete_where(&query).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.get_all(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_all_paged_falls_back_to_default_pagination() {
        let backend = InMemoryBackend::<Widget>::new();
        backend.initialize().await.unwrap();
        backend.save_all(vec![widget(1, "a"), widget(2, "b"), widget(3, "c")]).await.unwrap();
        let query = Query::new().first(2);
        let page = backend.get_all_paged(Some(&query)).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.page_info.has_next);
    }

    #[tokio::test]
    async fn crdt_only_methods_default_to_not_applicable() {
        let backend = InMemoryBackend::<Widget>::new();
        backend.initialize().await.unwrap();
        let err = backend.get_changeset(None).await.unwrap_err();
        assert!(matches!(err, StoreError::State { .. }));
        assert!(backend.node_id().is_none());
    }
}

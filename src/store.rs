//! The store facade — wires the backend, interceptor chains, memory
//! manager, cache tag index, and reliability layer together per the
//! data flow: application call → interceptor chain (forward) → backend
//! operation (possibly short-circuited) → interceptor chain (reverse) →
//! cache/memory-manager updates → watcher notifications. Failures
//! traverse `on_error` in reverse.
//!
//! Ownership: the store owns the backend, the interceptor chains, the
//! memory manager, and the cache tag index. The memory manager owns its
//! pressure handler. Watch subjects are shared between store and
//! subscribers and closed on [`Store::close`].

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::backend::Backend;
use crate::cache::CacheTagIndex;
use crate::config::StoreConfig;
use crate::entity::{FieldAccess, Identifiable};
use crate::error::{Result, StoreError};
use crate::interceptor::{Interceptor, InterceptorChain, StoreOperation};
use crate::memory::{MemoryManager, SizeEstimator};
use crate::pagination::PagedResult;
use crate::pending::{PendingChangeLedger, PendingOperation};
use crate::policy::{WritePolicy, WritePolicyHandler};
use crate::query::Query;
use crate::reliability::{CircuitBreaker, CircuitState, DegradationManager, DegradationMode, HealthService};

/// Per-operation interceptor chains, grouped because each dispatches a
/// distinct `(Req, Res)` pair and so cannot share a single
/// [`InterceptorChain`] instance. Empty by default; a host wires in only
/// the chains it needs.
pub struct StoreInterceptors<E: Identifiable> {
    /// Chain wrapping `get(id)`.
    pub get: Vec<Arc<dyn Interceptor<E::Id, Option<E>>>>,
    /// Chain wrapping `get_all(query)`.
    pub get_all: Vec<Arc<dyn Interceptor<Option<Query>, Vec<E>>>>,
    /// Chain wrapping `save(value)`.
    pub save: Vec<Arc<dyn Interceptor<E, E>>>,
    /// Chain wrapping `save_all(values)`.
    pub save_all: Vec<Arc<dyn Interceptor<Vec<E>, Vec<E>>>>,
    /// Chain wrapping `delete(id)`.
    pub delete: Vec<Arc<dyn Interceptor<E::Id, bool>>>,
    /// Chain wrapping `delete_all(ids)`.
    pub delete_all: Vec<Arc<dyn Interceptor<Vec<E::Id>, usize>>>,
}

impl<E: Identifiable> Default for StoreInterceptors<E> {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            get_all: Vec::new(),
            save: Vec::new(),
            save_all: Vec::new(),
            delete: Vec::new(),
            delete_all: Vec::new(),
        }
    }
}

/// Run `work` through the circuit breaker and feed the outcome into the
/// degradation manager's auto-mode reaction, independent of `Store`'s own
/// lifetime so it can be moved into a `'static` write-policy sync closure
/// (the `CacheFirst` policy fires these via `tokio::spawn`).
async fn guarded_call<F, Fut, T>(circuit_breaker: Arc<CircuitBreaker>, degradation: Arc<DegradationManager>, now: DateTime<Utc>, work: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    match circuit_breaker.execute(now, work).await {
        Ok(value) => {
            degradation.on_circuit_state(CircuitState::Closed, now);
            Ok(value)
        }
        Err(err) => {
            degradation.on_circuit_state(CircuitState::Open, now);
            Err(err)
        }
    }
}

/// The public facade: a uniform read/write/query/watch surface atop a
/// pluggable [`Backend`].
pub struct Store<E, B>
where
    E: Identifiable + FieldAccess + Clone + Send + Sync + 'static,
    E::Id: Hash + Send + Sync,
    B: Backend<E> + 'static,
{
    backend: Arc<B>,
    #[allow(dead_code)]
    config: StoreConfig,
    chain_get: InterceptorChain<E::Id, Option<E>>,
    chain_get_all: InterceptorChain<Option<Query>, Vec<E>>,
    chain_save: InterceptorChain<E, E>,
    chain_save_all: InterceptorChain<Vec<E>, Vec<E>>,
    chain_delete: InterceptorChain<E::Id, bool>,
    chain_delete_all: InterceptorChain<Vec<E::Id>, usize>,
    cache: CacheTagIndex<E::Id>,
    values: DashMap<E::Id, E>,
    memory: MemoryManager<E::Id>,
    size_estimator: Arc<dyn SizeEstimator<E>>,
    circuit_breaker: Arc<CircuitBreaker>,
    degradation: Arc<DegradationManager>,
    health: Arc<HealthService>,
    pending: Arc<PendingChangeLedger<E::Id, E>>,
}

impl<E, B> Store<E, B>
where
    E: Identifiable + FieldAccess + Clone + PartialEq + Send + Sync + 'static,
    E::Id: Hash + Send + Sync,
    B: Backend<E> + 'static,
{
    /// Construct a store. Does not call [`Backend::initialize`]; callers
    /// must do so (directly or via [`Store::initialize`]) before issuing
    /// any other operation.
    pub fn new(backend: Arc<B>, config: StoreConfig, interceptors: StoreInterceptors<E>, size_estimator: Arc<dyn SizeEstimator<E>>) -> Self {
        let now = Utc::now();
        Self {
            memory: MemoryManager::new(config.memory.clone()),
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), now)),
            degradation: Arc::new(DegradationManager::new(config.degradation.clone(), now)),
            health: Arc::new(HealthService::new(config.health_check.clone())),
            chain_get: InterceptorChain::new(interceptors.get),
            chain_get_all: InterceptorChain::new(interceptors.get_all),
            chain_save: InterceptorChain::new(interceptors.save),
            chain_save_all: InterceptorChain::new(interceptors.save_all),
            chain_delete: InterceptorChain::new(interceptors.delete),
            chain_delete_all: InterceptorChain::new(interceptors.delete_all),
            cache: CacheTagIndex::new(),
            values: DashMap::new(),
            pending: Arc::new(PendingChangeLedger::new()),
            backend,
            config,
            size_estimator,
        }
    }

    /// Bring the backend up and start the health service's periodic
    /// aggregation, if configured to auto-start.
    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await?;
        self.health.start_if_auto();
        Ok(())
    }

    /// Tear the store down: stop periodic health aggregation and close
    /// the backend. Idempotent, mirroring [`Backend::close`].
    pub async fn close(&self) -> Result<()> {
        self.health.stop_periodic();
        self.backend.close().await
    }

    /// Current degradation mode.
    pub fn degradation_mode(&self) -> DegradationMode {
        self.degradation.current_mode()
    }

    /// Subscribe to degradation mode transitions.
    pub fn degradation_stream(&self) -> watch::Receiver<DegradationMode> {
        self.degradation.mode_stream()
    }

    /// Current memory pressure/eviction metrics.
    pub fn memory_metrics(&self) -> crate::memory::MemoryMetrics {
        self.memory.metrics(Utc::now())
    }

    /// Current circuit breaker metrics.
    pub fn circuit_breaker_metrics(&self) -> crate::reliability::CircuitBreakerMetrics {
        self.circuit_breaker.metrics(Utc::now())
    }

    /// Run every registered health checker and aggregate.
    pub async fn check_health(&self) -> crate::reliability::SystemHealth {
        self.health.check_health().await
    }

    /// Register a health checker under `name`.
    pub fn register_health_checker(&self, name: impl Into<String>, checker: Arc<dyn crate::reliability::HealthChecker>) {
        self.health.register(name, checker);
    }

    /// Tag-index statistics, as of now.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats(Utc::now())
    }

    /// Pending-change snapshot stream.
    pub fn pending_changes_stream(&self) -> watch::Receiver<Vec<crate::pending::PendingChange<E::Id, E>>> {
        self.pending.snapshot_stream()
    }

    /// Invalidate (mark stale) every cached entry carrying any of `tags`.
    /// Does not evict the underlying value; a subsequent read still
    /// serves it, but [`crate::cache::CacheTagIndex::is_stale`] reports
    /// `true` for it.
    pub fn invalidate_by_tags(&self, tags: &[String]) {
        self.cache.invalidate_by_tags(tags, Utc::now());
    }

    fn record_cache_hit(&self, value: &E, now: DateTime<Utc>) {
        let id = value.id();
        self.cache.save(id.clone(), now, HashSet::new());
        self.values.insert(id.clone(), value.clone());
        let evicted = self.memory.record_item(id, value, self.size_estimator.as_ref(), now);
        for evicted_id in evicted {
            self.cache.remove_id(&evicted_id);
            self.values.remove(&evicted_id);
        }
    }

    fn forget(&self, id: &E::Id) {
        self.cache.remove_id(id);
        self.values.remove(id);
        self.memory.remove_item(id);
    }

    async fn run_through_circuit_breaker<F, Fut, T>(&self, now: DateTime<Utc>, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        guarded_call(self.circuit_breaker.clone(), self.degradation.clone(), now, work).await
    }

    /// Fetch a single entity by id. Served from the local cache when the
    /// current degradation mode forbids backend calls (`CacheOnly`).
    pub async fn get(&self, id: E::Id) -> Result<Option<E>> {
        let now = Utc::now();
        let mode = self.degradation.current_mode();
        if !mode.allows_reads() {
            return Err(StoreError::state("offline", "reads_available"));
        }
        let allows_backend = mode.allows_backend_calls();
        let cached = self.values.get(&id).map(|v| v.clone());

        if !allows_backend {
            return Ok(cached);
        }

        let backend = self.backend.clone();
        let lookup_id = id.clone();
        let result = self
            .chain_get
            .execute(StoreOperation::Get, id, move || async move { backend.get(&lookup_id).await })
            .await?;

        if let Some(value) = &result {
            self.record_cache_hit(value, now);
        }
        Ok(result)
    }

    /// Fetch every entity matching `query` (or all, if `None`). Served
    /// from the locally cached set when backend calls are disallowed.
    pub async fn get_all(&self, query: Option<Query>) -> Result<Vec<E>> {
        let now = Utc::now();
        let mode = self.degradation.current_mode();
        if !mode.allows_reads() {
            return Err(StoreError::state("offline", "reads_available"));
        }
        if !mode.allows_backend_calls() {
            let items: Vec<E> = self.values.iter().map(|e| e.value().clone()).collect();
            return Ok(match &query {
                Some(query) => crate::query::evaluate(&items, query),
                None => items,
            });
        }

        let backend = self.backend.clone();
        let lookup_query = query.clone();
        let result = self
            .chain_get_all
            .execute(StoreOperation::GetAll, query, move || async move { backend.get_all(lookup_query.as_ref()).await })
            .await?;

        for value in &result {
            self.record_cache_hit(value, now);
        }
        Ok(result)
    }

    /// Paginate `get_all`, preferring the backend's native pagination
    /// when it advertises support for it.
    pub async fn get_all_paged(&self, query: Option<Query>) -> Result<PagedResult<E>> {
        self.backend.get_all_paged(query.as_ref()).await
    }

    /// Subscribe to a single entity's changes.
    pub async fn watch(&self, id: E::Id) -> Result<watch::Receiver<Option<E>>> {
        if !self.degradation.current_mode().allows_reads() {
            return Err(StoreError::state("offline", "reads_available"));
        }
        self.backend.watch(&id).await
    }

    /// Subscribe to a collection's changes.
    pub async fn watch_all(&self, query: Option<Query>) -> Result<watch::Receiver<Vec<E>>> {
        if !self.degradation.current_mode().allows_reads() {
            return Err(StoreError::state("offline", "reads_available"));
        }
        self.backend.watch_all(query.as_ref()).await
    }

    /// Persist one entity under `policy`: the cache write always
    /// happens; the network sync is applied, deferred, or skipped
    /// according to `policy`.
    pub async fn save(&self, value: E, policy: WritePolicy) -> Result<E> {
        let now = Utc::now();
        if policy != WritePolicy::CacheOnly && !self.degradation.current_mode().allows_writes() {
            return Err(StoreError::state("read_only", "writes_available"));
        }

        let id = value.id();
        let original = self.values.get(&id).map(|v| v.clone());
        let operation = if original.is_some() { PendingOperation::Update } else { PendingOperation::Create };

        let chain_value = value.clone();
        let stored = self
            .chain_save
            .execute(StoreOperation::Save, value, move || async move { Ok(chain_value) })
            .await?;
        self.record_cache_hit(&stored, now);

        let backend = self.backend.clone();
        let sync_value = stored.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let degradation = self.degradation.clone();
        let pending_item = stored.clone();

        WritePolicyHandler::apply(policy, || async { Ok(()) }, move || async move {
            guarded_call(circuit_breaker, degradation, now, move || async move { backend.save(sync_value).await.map(|_| ()) }).await
        })
        .await
        .map_err(|err| {
            self.pending.add(id, pending_item, operation, original, now);
            err
        })?;

        Ok(stored)
    }

    /// Persist a batch under `policy`.
    pub async fn save_all(&self, values: Vec<E>, policy: WritePolicy) -> Result<Vec<E>> {
        let now = Utc::now();
        if policy != WritePolicy::CacheOnly && !self.degradation.current_mode().allows_writes() {
            return Err(StoreError::state("read_only", "writes_available"));
        }

        let originals: Vec<(E::Id, Option<E>)> = values.iter().map(|v| (v.id(), self.values.get(&v.id()).map(|e| e.clone()))).collect();

        let chain_values = values.clone();
        let stored = self
            .chain_save_all
            .execute(StoreOperation::SaveAll, values, move || async move { Ok(chain_values) })
            .await?;

        for value in &stored {
            self.record_cache_hit(value, now);
        }

        let backend = self.backend.clone();
        let sync_values = stored.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let degradation = self.degradation.clone();
        let pending_items = stored.clone();

        WritePolicyHandler::apply(policy, || async { Ok(()) }, move || async move {
            guarded_call(circuit_breaker, degradation, now, move || async move { backend.save_all(sync_values).await.map(|_| ()) }).await
        })
        .await
        .map_err(|err| {
            for ((id, original), item) in originals.into_iter().zip(pending_items) {
                let operation = if original.is_some() { PendingOperation::Update } else { PendingOperation::Create };
                self.pending.add(id, item, operation, original, now);
            }
            err
        })?;

        Ok(stored)
    }

    /// Delete by id under `policy`. Returns whether a cached or backend
    /// row was actually removed.
    pub async fn delete(&self, id: E::Id, policy: WritePolicy) -> Result<bool> {
        let now = Utc::now();
        if policy != WritePolicy::CacheOnly && !self.degradation.current_mode().allows_writes() {
            return Err(StoreError::state("read_only", "writes_available"));
        }

        let original = self.values.get(&id).map(|v| v.clone());
        let delete_id = id.clone();
        let existed = original.is_some();

        let removed_locally = self
            .chain_delete
            .execute(StoreOperation::Delete, id.clone(), move || async move { Ok(existed) })
            .await?;
        self.forget(&delete_id);

        let backend = self.backend.clone();
        let sync_id = delete_id.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let degradation = self.degradation.clone();

        WritePolicyHandler::apply(policy, || async { Ok(()) }, move || async move {
            guarded_call(circuit_breaker, degradation, now, move || async move { backend.delete(&sync_id).await.map(|_| ()) }).await
        })
        .await
        .map_err(|err| {
            if let Some(item) = original.clone() {
                self.pending.add(delete_id, item, PendingOperation::Delete, original, now);
            }
            err
        })?;

        Ok(removed_locally)
    }

    /// Delete a batch of ids under `policy`, returning the number
    /// removed locally.
    pub async fn delete_all(&self, ids: Vec<E::Id>, policy: WritePolicy) -> Result<usize> {
        let now = Utc::now();
        if policy != WritePolicy::CacheOnly && !self.degradation.current_mode().allows_writes() {
            return Err(StoreError::state("read_only", "writes_available"));
        }

        let originals: Vec<(E::Id, Option<E>)> = ids.iter().map(|id| (id.clone(), self.values.get(id).map(|v| v.clone()))).collect();
        let existing_count = originals.iter().filter(|(_, original)| original.is_some()).count();

        let removed_count = self
            .chain_delete_all
            .execute(StoreOperation::DeleteAll, ids.clone(), move || async move { Ok(existing_count) })
            .await?;

        for id in &ids {
            self.forget(id);
        }

        let backend = self.backend.clone();
        let sync_ids = ids.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let degradation = self.degradation.clone();

        WritePolicyHandler::apply(policy, || async { Ok(()) }, move || async move {
            guarded_call(circuit_breaker, degradation, now, move || async move { backend.delete_all(&sync_ids).await.map(|_| ()) }).await
        })
        .await
        .map_err(|err| {
            for (id, original) in originals {
                if let Some(item) = original.clone() {
                    self.pending.add(id, item, PendingOperation::Delete, original, now);
                }
            }
            err
        })?;

        Ok(removed_count)
    }

    /// Reconcile pending local changes with the backend.
    pub async fn sync(&self) -> Result<()> {
        let now = Utc::now();
        if !self.degradation.current_mode().allows_backend_calls() {
            return Err(StoreError::state("backend_unreachable", "backend_reachable"));
        }
        let backend = self.backend.clone();
        self.run_through_circuit_breaker(now, move || async move { backend.sync().await }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::query::Value;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Note {
        id: u32,
        body: String,
    }

    impl Identifiable for Note {
        type Id = u32;
        fn id(&self) -> u32 {
            self.id
        }
    }

    impl FieldAccess for Note {
        fn field(&self, name: &str) -> Option<Value> {
            match name {
                "body" => Some(Value::Text(self.body.clone())),
                _ => None,
            }
        }
    }

    struct FixedSize;
    impl SizeEstimator<Note> for FixedSize {
        fn estimate(&self, _value: &Note) -> u64 {
            16
        }
    }

    fn note(id: u32, body: &str) -> Note {
        Note { id, body: body.to_string() }
    }

    async fn store() -> Store<Note, InMemoryBackend<Note>> {
        let backend = Arc::new(InMemoryBackend::<Note>::new());
        let store = Store::new(backend, StoreConfig::default(), StoreInterceptors::default(), Arc::new(FixedSize));
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn save_then_get_round_trips_through_cache_and_backend() {
        let store = store().await;
        let saved = store.save(note(1, "hello"), WritePolicy::CacheAndNetwork).await.unwrap();
        assert_eq!(saved, note(1, "hello"));
        assert_eq!(store.get(1).await.unwrap(), Some(note(1, "hello")));
    }

    #[tokio::test]
    async fn cache_only_write_never_reaches_backend() {
        let store = store().await;
        store.save(note(1, "local"), WritePolicy::CacheOnly).await.unwrap();
        assert_eq!(store.get(1).await.unwrap(), Some(note(1, "local")));
    }

    #[tokio::test]
    async fn offline_mode_rejects_reads() {
        let store = store().await;
        store.save(note(1, "a"), WritePolicy::CacheAndNetwork).await.unwrap();
        store.degradation.degrade(DegradationMode::Offline, Utc::now());
        let err = store.get(1).await.unwrap_err();
        assert!(matches!(err, StoreError::State { .. }));
    }

    #[tokio::test]
    async fn cache_only_mode_serves_reads_without_backend_calls() {
        let store = store().await;
        store.save(note(1, "cached"), WritePolicy::CacheAndNetwork).await.unwrap();
        store.degradation.degrade(DegradationMode::CacheOnly, Utc::now());
        assert_eq!(store.get(1).await.unwrap(), Some(note(1, "cached")));
    }

    #[tokio::test]
    async fn delete_removes_from_cache_and_backend() {
        let store = store().await;
        store.save(note(1, "a"), WritePolicy::CacheAndNetwork).await.unwrap();
        let removed = store.delete(1, WritePolicy::CacheAndNetwork).await.unwrap();
        assert!(removed);
        assert_eq!(store.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_only_mode_rejects_writes_but_allows_reads() {
        let store = store().await;
        store.save(note(1, "a"), WritePolicy::CacheAndNetwork).await.unwrap();
        store.degradation.degrade(DegradationMode::ReadOnly, Utc::now());
        assert!(store.save(note(2, "b"), WritePolicy::CacheAndNetwork).await.is_err());
        assert_eq!(store.get(1).await.unwrap(), Some(note(1, "a")));
    }
}

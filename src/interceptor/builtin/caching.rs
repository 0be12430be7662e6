//! Single-flight request deduplication.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::interceptor::chain::Interceptor;
use crate::interceptor::context::{InterceptorContext, RequestOutcome, StoreOperation};

const LEADER_KEY: &str = "caching.is_leader";
const FLIGHT_KEY: &str = "caching.key";

struct InFlight<Res> {
    tx: broadcast::Sender<Result<Res, String>>,
}

/// Deduplicates concurrent identical `(operation, fingerprint(request))`
/// calls: the first caller ("leader") runs the backend normally; callers
/// arriving while it is in flight ("followers") await its outcome instead
/// of issuing their own backend call. Defaults to `{Get, GetAll}`.
pub struct CachingInterceptor<Req, Res: Clone + Send + Sync + 'static> {
    operations: HashSet<StoreOperation>,
    in_flight: Mutex<HashMap<String, Arc<InFlight<Res>>>>,
    key_fn: Box<dyn Fn(StoreOperation, &Req) -> String + Send + Sync>,
}

impl<Req: Hash, Res: Clone + Send + Sync + 'static> CachingInterceptor<Req, Res> {
    /// Construct a caching interceptor with the default key function:
    /// operation plus a hash of the request.
    pub fn new() -> Self {
        Self::with_key_fn(|operation, request| {
            let mut hasher = DefaultHasher::new();
            operation.hash(&mut hasher);
            request.hash(&mut hasher);
            format!("{operation:?}:{:x}", hasher.finish())
        })
    }
}

impl<Req, Res: Clone + Send + Sync + 'static> CachingInterceptor<Req, Res> {
    /// Construct a caching interceptor with a custom fingerprint function.
    pub fn with_key_fn(key_fn: impl Fn(StoreOperation, &Req) -> String + Send + Sync + 'static) -> Self {
        Self {
            operations: HashSet::from([StoreOperation::Get, StoreOperation::GetAll]),
            in_flight: Mutex::new(HashMap::new()),
            key_fn: Box::new(key_fn),
        }
    }

    fn complete(&self, key: &str, outcome: Result<Res, String>) {
        let entry = self.in_flight.lock().remove(key);
        if let Some(entry) = entry {
            let _ = entry.tx.send(outcome);
        }
    }
}

#[async_trait]
impl<Req: Send + Sync, Res: Clone + Send + Sync + 'static> Interceptor<Req, Res> for CachingInterceptor<Req, Res> {
    fn operations(&self) -> &HashSet<StoreOperation> {
        &self.operations
    }

    async fn on_request(&self, ctx: &mut InterceptorContext<Req, Res>) -> RequestOutcome<Res> {
        let key = (self.key_fn)(ctx.operation, &ctx.request);

        let existing = self.in_flight.lock().get(&key).map(|entry| entry.tx.subscribe());

        match existing {
            Some(mut rx) => {
                ctx.metadata.set(LEADER_KEY, false);
                match rx.recv().await {
                    Ok(Ok(response)) => RequestOutcome::Provide(response),
                    Ok(Err(message)) => RequestOutcome::Error(StoreError::Sync(message)),
                    Err(_) => RequestOutcome::Continue,
                }
            }
            None => {
                let (tx, _rx) = broadcast::channel(16);
                self.in_flight.lock().insert(key.clone(), Arc::new(InFlight { tx }));
                ctx.metadata.set(LEADER_KEY, true);
                ctx.metadata.set(FLIGHT_KEY, key);
                RequestOutcome::Continue
            }
        }
    }

    async fn on_response(&self, ctx: &mut InterceptorContext<Req, Res>) -> Result<(), StoreError> {
        if ctx.metadata.get::<bool>(LEADER_KEY) == Some(&true) {
            if let Some(key) = ctx.metadata.take::<String>(FLIGHT_KEY) {
                if let Some(response) = &ctx.response {
                    self.complete(&key, Ok(response.clone()));
                }
            }
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &mut InterceptorContext<Req, Res>, err: &StoreError) -> Result<(), StoreError> {
        if ctx.metadata.get::<bool>(LEADER_KEY) == Some(&true) {
            if let Some(key) = ctx.metadata.take::<String>(FLIGHT_KEY) {
                self.complete(&key, Err(err.to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn followers_share_the_leaders_outcome_work_runs_once() {
        // Testable property 10.
        let interceptor: Arc<CachingInterceptor<u32, String>> = Arc::new(CachingInterceptor::with_key_fn(|op, req| format!("{op:?}:{req}")));
        let work_calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5u32 {
            let interceptor = interceptor.clone();
            let work_calls = work_calls.clone();
            handles.push(tokio::spawn(async move {
                let mut ctx: InterceptorContext<u32, String> = InterceptorContext::new(StoreOperation::Get, 7);
                let outcome = interceptor.on_request(&mut ctx).await;
                let is_leader = ctx.metadata.get::<bool>(LEADER_KEY).copied().unwrap_or(false);
                let response = match outcome {
                    RequestOutcome::Continue => {
                        assert!(is_leader);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        work_calls.fetch_add(1, Ordering::SeqCst);
                        let response = "shared-result".to_string();
                        ctx.response = Some(response.clone());
                        interceptor.on_response(&mut ctx).await.unwrap();
                        response
                    }
                    RequestOutcome::Provide(v) => v,
                    _ => panic!("unexpected outcome"),
                };
                response
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), "shared-result");
        }
        assert_eq!(work_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn key_is_released_after_completion_so_next_call_runs_afresh() {
        let interceptor: CachingInterceptor<u32, String> = CachingInterceptor::with_key_fn(|op, req| format!("{op:?}:{req}"));
        let mut ctx: InterceptorContext<u32, String> = InterceptorContext::new(StoreOperation::Get, 1);
        interceptor.on_request(&mut ctx).await;
        ctx.response = Some("first".to_string());
        interceptor.on_response(&mut ctx).await.unwrap();
        assert!(interceptor.in_flight.lock().is_empty());

        let mut ctx2: InterceptorContext<u32, String> = InterceptorContext::new(StoreOperation::Get, 1);
        let outcome = interceptor.on_request(&mut ctx2).await;
        assert!(matches!(outcome, RequestOutcome::Continue));
    }

    #[tokio::test]
    async fn followers_observe_leader_errors_too() {
        let interceptor: Arc<CachingInterceptor<u32, String>> = Arc::new(CachingInterceptor::with_key_fn(|op, req| format!("{op:?}:{req}")));

        let leader_interceptor = interceptor.clone();
        let mut leader_ctx: InterceptorContext<u32, String> = InterceptorContext::new(StoreOperation::Get, 9);
        leader_interceptor.on_request(&mut leader_ctx).await;

        let follower_interceptor = interceptor.clone();
        let follower_task = tokio::spawn(async move {
            let mut ctx: InterceptorContext<u32, String> = InterceptorContext::new(StoreOperation::Get, 9);
            follower_interceptor.on_request(&mut ctx).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        leader_interceptor
            .on_error(&mut leader_ctx, &StoreError::Network("boom".to_string()))
            .await
            .unwrap();

        let follower_outcome = follower_task.await.unwrap();
        match follower_outcome {
            RequestOutcome::Error(StoreError::Sync(message)) => assert!(message.contains("boom")),
            _ => panic!("expected follower to observe the leader's error"),
        }
    }
}

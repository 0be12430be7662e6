//! The interceptor chain runner: forward request phase, backend work,
//! reverse response phase, with error unwinding through `on_error`.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::interceptor::context::{InterceptorContext, RequestOutcome, StoreOperation};

/// Middleware participating in a [`InterceptorChain`].
///
/// `on_response`/`on_error` default to no-ops so an interceptor that only
/// cares about the request phase (e.g. validation) doesn't have to
/// implement every hook.
#[async_trait]
pub trait Interceptor<Req: Send + Sync, Res: Send + Sync>: Send + Sync {
    /// The set of operations this interceptor applies to.
    fn operations(&self) -> &HashSet<StoreOperation>;

    /// Forward-phase hook.
    async fn on_request(&self, ctx: &mut InterceptorContext<Req, Res>) -> RequestOutcome<Res>;

    /// Reverse-phase hook, run only on interceptors that processed the
    /// forward phase. A thrown error here is not retried and propagates.
    async fn on_response(&self, _ctx: &mut InterceptorContext<Req, Res>) -> Result<(), StoreError> {
        Ok(())
    }

    /// Error-unwind hook, run in reverse on already-processed
    /// interceptors whenever the call fails.
    async fn on_error(&self, _ctx: &mut InterceptorContext<Req, Res>, _err: &StoreError) -> Result<(), StoreError> {
        Ok(())
    }
}

/// An ordered, construction-order-preserving list of interceptors that
/// wraps every store operation.
pub struct InterceptorChain<Req: Send + Sync, Res: Send + Sync> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Res>>>,
}

impl<Req: Send + Sync, Res: Send + Sync> InterceptorChain<Req, Res> {
    /// Construct a chain from an ordered list of interceptors.
    pub fn new(interceptors: Vec<Arc<dyn Interceptor<Req, Res>>>) -> Self {
        Self { interceptors }
    }

    fn applicable(&self, operation: StoreOperation) -> Vec<&Arc<dyn Interceptor<Req, Res>>> {
        self.interceptors.iter().filter(|i| i.operations().contains(&operation)).collect()
    }

    /// Run the chain around `do_work`: forward through each applicable
    /// interceptor's `on_request`, invoke `do_work` unless one of them
    /// already supplied a response, then unwind in reverse through
    /// `on_response`/`on_error`.
    pub async fn execute<F, Fut>(&self, operation: StoreOperation, request: Req, do_work: F) -> Result<Res, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Res, StoreError>>,
    {
        let applicable = self.applicable(operation);
        let mut ctx = InterceptorContext::new(operation, request);

        let mut short_circuited_at: Option<usize> = None;
        for (i, interceptor) in applicable.iter().enumerate() {
            match interceptor.on_request(&mut ctx).await {
                RequestOutcome::Continue => {}
                RequestOutcome::Provide(v) => {
                    ctx.response = Some(v);
                }
                RequestOutcome::ShortCircuit(v) => {
                    ctx.response = Some(v);
                    short_circuited_at = Some(i);
                    break;
                }
                RequestOutcome::Error(e) => {
                    for prior in applicable[0..i].iter().rev() {
                        prior.on_error(&mut ctx, &e).await?;
                    }
                    return Err(e);
                }
            }
        }

        let processed_count = short_circuited_at.map(|i| i + 1).unwrap_or(applicable.len());

        if ctx.response.is_none() {
            match do_work().await {
                Ok(res) => ctx.response = Some(res),
                Err(e) => {
                    for prior in applicable[0..processed_count].iter().rev() {
                        prior.on_error(&mut ctx, &e).await?;
                    }
                    return Err(e);
                }
            }
        }

        for prior in applicable[0..processed_count].iter().rev() {
            prior.on_response(&mut ctx).await?;
        }

        ctx.response
            .take()
            .ok_or_else(|| StoreError::state("no_response", "response_set"))
    }
}

//! Reports an [`OperationMetric`] for every applicable operation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::StoreError;
use crate::interceptor::chain::Interceptor;
use crate::interceptor::context::{InterceptorContext, RequestOutcome, StoreOperation};
use crate::metrics::{MetricsReporter, OperationMetric};

const STOPWATCH_KEY: &str = "timing.stopwatch";

/// Starts a monotonic stopwatch on `on_request`; stops it and reports an
/// [`OperationMetric`] on `on_response`/`on_error`.
pub struct TimingInterceptor {
    operations: HashSet<StoreOperation>,
    reporter: Arc<dyn MetricsReporter>,
}

impl TimingInterceptor {
    /// Construct a timing interceptor applicable to `operations`,
    /// reporting through `reporter`.
    pub fn new(operations: HashSet<StoreOperation>, reporter: Arc<dyn MetricsReporter>) -> Self {
        Self { operations, reporter }
    }

    fn elapsed<Req, Res>(&self, ctx: &mut InterceptorContext<Req, Res>) -> Duration {
        ctx.metadata
            .take::<Instant>(STOPWATCH_KEY)
            .map(|start| start.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

#[async_trait]
impl<Req: Send + Sync, Res: Send + Sync> Interceptor<Req, Res> for TimingInterceptor {
    fn operations(&self) -> &HashSet<StoreOperation> {
        &self.operations
    }

    async fn on_request(&self, ctx: &mut InterceptorContext<Req, Res>) -> RequestOutcome<Res> {
        ctx.metadata.set(STOPWATCH_KEY, Instant::now());
        RequestOutcome::Continue
    }

    async fn on_response(&self, ctx: &mut InterceptorContext<Req, Res>) -> Result<(), StoreError> {
        let duration = self.elapsed(ctx);
        self.reporter
            .report_operation(OperationMetric {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation: ctx.operation,
                duration,
                success: true,
                error_message: None,
            })
            .await;
        Ok(())
    }

    async fn on_error(&self, ctx: &mut InterceptorContext<Req, Res>, err: &StoreError) -> Result<(), StoreError> {
        let duration = self.elapsed(ctx);
        self.reporter
            .report_operation(OperationMetric {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation: ctx.operation,
                duration,
                success: false,
                error_message: Some(err.to_string()),
            })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingReporter {
        operations: Mutex<Vec<OperationMetric>>,
    }

    #[async_trait]
    impl MetricsReporter for CapturingReporter {
        async fn report_operation(&self, metric: OperationMetric) {
            self.operations.lock().push(metric);
        }
        async fn report_cache(&self, _metric: crate::metrics::CacheMetric) {}
        async fn report_sync(&self, _metric: crate::metrics::SyncMetric) {}
        async fn report_error(&self, _metric: crate::metrics::ErrorMetric) {}
        async fn report_pool(&self, _metric: crate::metrics::PoolMetric) {}
        async fn flush(&self) {}
        async fn dispose(&self) {}
    }

    #[tokio::test]
    async fn reports_success_with_elapsed_duration() {
        let reporter = Arc::new(CapturingReporter::default());
        let interceptor = TimingInterceptor::new(HashSet::from([StoreOperation::Get]), reporter.clone());
        let mut ctx: InterceptorContext<(), ()> = InterceptorContext::new(StoreOperation::Get, ());
        interceptor.on_request(&mut ctx).await;
        interceptor.on_response(&mut ctx).await.unwrap();
        let reported = reporter.operations.lock();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].success);
    }

    #[tokio::test]
    async fn missing_stopwatch_reports_zero_duration() {
        let reporter = Arc::new(CapturingReporter::default());
        let interceptor = TimingInterceptor::new(HashSet::from([StoreOperation::Get]), reporter.clone());
        let mut ctx: InterceptorContext<(), ()> = InterceptorContext::new(StoreOperation::Get, ());
        // on_request was never called, so no stopwatch is present.
        interceptor.on_response(&mut ctx).await.unwrap();
        assert_eq!(reporter.operations.lock()[0].duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn reports_failure_with_error_message() {
        let reporter = Arc::new(CapturingReporter::default());
        let interceptor = TimingInterceptor::new(HashSet::from([StoreOperation::Get]), reporter.clone());
        let mut ctx: InterceptorContext<(), ()> = InterceptorContext::new(StoreOperation::Get, ());
        interceptor.on_request(&mut ctx).await;
        interceptor.on_error(&mut ctx, &StoreError::Network("down".to_string())).await.unwrap();
        let reported = reporter.operations.lock();
        assert!(!reported[0].success);
        assert!(reported[0].error_message.is_some());
    }
}

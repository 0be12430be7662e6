//! Start/completion/error log lines around every applicable operation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use crate::error::StoreError;
use crate::interceptor::chain::Interceptor;
use crate::interceptor::context::{InterceptorContext, RequestOutcome, StoreOperation};

const START_TIME_KEY: &str = "logging.start_time";

/// Logs a start-of-operation line, a completion line with elapsed time,
/// and an error line with severe level, each independently toggleable.
pub struct LoggingInterceptor {
    operations: HashSet<StoreOperation>,
    log_request: bool,
    log_response: bool,
    log_error: bool,
}

impl LoggingInterceptor {
    /// Construct a logging interceptor applicable to `operations`, with
    /// all three phases enabled.
    pub fn new(operations: HashSet<StoreOperation>) -> Self {
        Self {
            operations,
            log_request: true,
            log_response: true,
            log_error: true,
        }
    }

    /// Toggle request-phase logging.
    pub fn with_log_request(mut self, enabled: bool) -> Self {
        self.log_request = enabled;
        self
    }

    /// Toggle response-phase logging.
    pub fn with_log_response(mut self, enabled: bool) -> Self {
        self.log_response = enabled;
        self
    }

    /// Toggle error-phase logging.
    pub fn with_log_error(mut self, enabled: bool) -> Self {
        self.log_error = enabled;
        self
    }
}

#[async_trait]
impl<Req: Send + Sync, Res: Send + Sync> Interceptor<Req, Res> for LoggingInterceptor {
    fn operations(&self) -> &HashSet<StoreOperation> {
        &self.operations
    }

    async fn on_request(&self, ctx: &mut InterceptorContext<Req, Res>) -> RequestOutcome<Res> {
        let now = Utc::now();
        ctx.metadata.set(START_TIME_KEY, now);
        if self.log_request {
            info!(operation = ?ctx.operation, "store operation started");
        }
        RequestOutcome::Continue
    }

    async fn on_response(&self, ctx: &mut InterceptorContext<Req, Res>) -> Result<(), StoreError> {
        if self.log_response {
            let elapsed = ctx
                .metadata
                .get::<chrono::DateTime<Utc>>(START_TIME_KEY)
                .map(|start| Utc::now() - *start);
            info!(operation = ?ctx.operation, elapsed_ms = elapsed.map(|d| d.num_milliseconds()), "store operation completed");
        }
        Ok(())
    }

    async fn on_error(&self, ctx: &mut InterceptorContext<Req, Res>, err: &StoreError) -> Result<(), StoreError> {
        if self.log_error {
            error!(operation = ?ctx.operation, error = %err, "store operation failed");
        }
        Ok(())
    }
}

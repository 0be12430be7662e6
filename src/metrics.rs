//! Typed metric payloads and the reporter boundary the core calls into.
//!
//! Field shapes follow an id, a timestamp, structured fields, and a
//! free-form metadata/tag map. This crate defines nothing about
//! transport: the core calls a [`MetricsReporter`] capability and leaves
//! shipping the metrics elsewhere entirely up to the host.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::interceptor::context::StoreOperation;

/// One completed store operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetric {
    /// Unique id for this metric emission.
    pub id: Uuid,
    /// When the operation completed.
    pub timestamp: DateTime<Utc>,
    /// Which operation ran.
    pub operation: StoreOperation,
    /// How long it took.
    pub duration: Duration,
    /// Whether it succeeded.
    pub success: bool,
    /// Error message, present iff `!success`.
    pub error_message: Option<String>,
}

/// A cache-layer event (hit/miss/invalidation/eviction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetric {
    /// Unique id for this metric emission.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event name, e.g. `"hit"`, `"miss"`, `"invalidate"`, `"evict"`.
    pub event: String,
    /// Entries affected.
    pub count: u64,
    /// Free-form tags.
    pub tags: HashMap<String, String>,
}

/// A backend sync cycle's outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMetric {
    /// Unique id for this metric emission.
    pub id: Uuid,
    /// When the sync ran.
    pub timestamp: DateTime<Utc>,
    /// Items synced.
    pub items_synced: u64,
    /// Items that failed.
    pub items_failed: u64,
    /// How long the cycle took.
    pub duration: Duration,
}

/// An error surfaced anywhere in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetric {
    /// Unique id for this metric emission.
    pub id: Uuid,
    /// When the error occurred.
    pub timestamp: DateTime<Utc>,
    /// Error taxonomy kind, e.g. `"validation"`, `"network"`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

/// Connection/resource pool occupancy (for backends that pool
/// connections).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolMetric {
    /// Unique id for this metric emission.
    pub id: Uuid,
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Connections currently in use.
    pub in_use: u32,
    /// Connections sitting idle.
    pub idle: u32,
    /// Maximum pool size.
    pub max_size: u32,
}

/// The metrics boundary the core calls into. Hosts implement this to
/// ship metrics to whatever transport they use; this crate defines
/// nothing about that transport.
#[async_trait]
pub trait MetricsReporter: Send + Sync {
    /// Report a completed operation.
    async fn report_operation(&self, metric: OperationMetric);

    /// Report a cache event.
    async fn report_cache(&self, metric: CacheMetric);

    /// Report a sync cycle.
    async fn report_sync(&self, metric: SyncMetric);

    /// Report an error.
    async fn report_error(&self, metric: ErrorMetric);

    /// Report a pool snapshot.
    async fn report_pool(&self, metric: PoolMetric);

    /// Flush any buffered metrics.
    async fn flush(&self);

    /// Release any resources held by this reporter.
    async fn dispose(&self);
}

/// A reporter that discards every metric, the default for hosts that
/// don't wire one up.
pub struct NoopMetricsReporter;

#[async_trait]
impl MetricsReporter for NoopMetricsReporter {
    async fn report_operation(&self, _metric: OperationMetric) {}
    async fn report_cache(&self, _metric: CacheMetric) {}
    async fn report_sync(&self, _metric: SyncMetric) {}
    async fn report_error(&self, _metric: ErrorMetric) {}
    async fn report_pool(&self, _metric: PoolMetric) {}
    async fn flush(&self) {}
    async fn dispose(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_reporter_accepts_every_metric_kind() {
        let reporter = NoopMetricsReporter;
        reporter
            .report_operation(OperationMetric {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                operation: StoreOperation::Get,
                duration: Duration::from_millis(5),
                success: true,
                error_message: None,
            })
            .await;
        reporter.flush().await;
        reporter.dispose().await;
    }
}

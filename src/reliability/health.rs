//! Health checker registry and aggregation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::util::Behavior;

/// Health of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Operating with reduced capability.
    Degraded,
    /// Not operating.
    Unhealthy,
}

/// A component's health as of the last check.
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    /// The checker's registered name. Filled in by [`HealthService`] from
    /// the registry key; a [`HealthChecker`] itself need not set it.
    pub name: String,
    /// Status.
    pub status: HealthStatus,
    /// Optional human-readable detail, populated on `Degraded`/`Unhealthy`.
    pub message: Option<String>,
    /// When this result was produced.
    pub checked_at: DateTime<Utc>,
    /// How long the probe took to run.
    pub response_time: Option<StdDuration>,
    /// Free-form structured detail a checker wants to surface (e.g. pool
    /// occupancy, queue depth).
    pub details: Option<JsonValue>,
}

impl ComponentHealth {
    /// Construct a minimal healthy result; checkers fill in `name` via
    /// [`HealthService::register`]'s bookkeeping, not this constructor.
    pub fn healthy() -> Self {
        Self {
            name: String::new(),
            status: HealthStatus::Healthy,
            message: None,
            checked_at: Utc::now(),
            response_time: None,
            details: None,
        }
    }
}

/// Aggregate health across every registered component.
#[derive(Debug, Clone)]
pub struct SystemHealth {
    /// `worst()` of all component statuses.
    pub status: HealthStatus,
    /// Per-component detail.
    pub components: HashMap<String, ComponentHealth>,
}

/// A single health probe.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Run the probe, returning its result.
    async fn check(&self) -> ComponentHealth;
}

/// Health checker tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckConfig {
    /// How long a single checker is allowed to run before being treated
    /// as `Unhealthy`.
    pub timeout: StdDuration,
    /// How often the periodic task (when `auto_start`) runs checks.
    pub check_interval: StdDuration,
    /// Whether the periodic task starts automatically.
    pub auto_start: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: StdDuration::from_secs(5),
            check_interval: StdDuration::from_secs(30),
            auto_start: false,
        }
    }
}

impl HealthCheckConfig {
    /// Validate invariants: durations positive, `timeout <= check_interval`.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() || self.check_interval.is_zero() {
            return Err("timeout and check_interval must be positive".to_string());
        }
        if self.timeout > self.check_interval {
            return Err("timeout must not exceed check_interval".to_string());
        }
        Ok(())
    }
}

/// Registry of named health checkers plus the aggregated status stream.
pub struct HealthService {
    config: HealthCheckConfig,
    checkers: Mutex<HashMap<String, Arc<dyn HealthChecker>>>,
    status: Behavior<HealthStatus>,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl HealthService {
    /// Construct an empty registry.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            checkers: Mutex::new(HashMap::new()),
            status: Behavior::new(HealthStatus::Healthy),
            periodic: Mutex::new(None),
        }
    }

    /// Spawn the periodic aggregation task at `config.check_interval`, if
    /// `config.auto_start` is set and it isn't already running. Returns
    /// whether a task was spawned.
    pub fn start_if_auto(self: &Arc<Self>) -> bool {
        if !self.config.auto_start {
            return false;
        }
        let mut slot = self.periodic.lock();
        if slot.is_some() {
            return false;
        }
        let service = self.clone();
        let interval = self.config.check_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                service.check_health().await;
            }
        }));
        true
    }

    /// Stop the periodic task, if running.
    pub fn stop_periodic(&self) {
        if let Some(handle) = self.periodic.lock().take() {
            handle.abort();
        }
    }

    /// Register (or replace) a checker under `name`.
    pub fn register(&self, name: impl Into<String>, checker: Arc<dyn HealthChecker>) {
        self.checkers.lock().insert(name.into(), checker);
    }

    /// Subscribe to aggregate status transitions.
    pub fn status_stream(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    /// Run every registered checker concurrently, each bounded by
    /// `config.timeout`, and aggregate via `worst()`.
    pub async fn check_health(&self) -> SystemHealth {
        let checkers: Vec<(String, Arc<dyn HealthChecker>)> = self
            .checkers
            .lock()
            .iter()
            .map(|(name, checker)| (name.clone(), checker.clone()))
            .collect();

        let futures = checkers.into_iter().map(|(name, checker)| async move {
            let now = Utc::now();
            let started = std::time::Instant::now();
            let result = tokio::time::timeout(self.config.timeout, checker.check()).await;
            let mut health = match result {
                Ok(health) => health,
                Err(_) => ComponentHealth {
                    name: name.clone(),
                    status: HealthStatus::Unhealthy,
                    message: Some("health check timeout".to_string()),
                    checked_at: now,
                    response_time: None,
                    details: None,
                },
            };
            health.name = name.clone();
            health.response_time.get_or_insert(started.elapsed());
            (name, health)
        });

        let results = futures::future::join_all(futures).await;
        let components: HashMap<String, ComponentHealth> = results.into_iter().collect();
        let worst = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        self.status.set(worst);
        SystemHealth {
            status: worst,
            components,
        }
    }
}

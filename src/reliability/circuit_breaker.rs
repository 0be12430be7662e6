//! Circuit breaker state machine.

use std::future::Future;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::util::Behavior;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected outright.
    Open,
    /// A bounded number of probe requests are allowed through.
    HalfOpen,
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive (well, cumulative since last reset) failures in
    /// `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// Consecutive successes in `HalfOpen` before returning to `Closed`.
    pub success_threshold: u32,
    /// How long `Open` lasts before a probe is allowed.
    #[serde(with = "crate::config::chrono_duration_seconds")]
    pub open_duration: chrono::Duration,
    /// Maximum concurrent probes allowed while `HalfOpen`.
    pub half_open_max: u32,
    /// When `false`, the breaker is inert: always `Closed`, always allows.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            open_duration: chrono::Duration::seconds(30),
            half_open_max: 3,
            enabled: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate invariants: thresholds and duration must be positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 || self.success_threshold == 0 || self.half_open_max == 0 {
            return Err("failure_threshold, success_threshold, and half_open_max must be > 0".to_string());
        }
        if self.open_duration <= chrono::Duration::zero() {
            return Err("open_duration must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    failures: u32,
    successes: u32,
    half_open_in_flight: u32,
}

/// A point-in-time snapshot of a [`CircuitBreaker`]'s counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    /// Current state.
    pub state: CircuitState,
    /// Failures recorded since the last reset.
    pub failures: u32,
    /// Successes recorded since the last reset.
    pub successes: u32,
    /// Requests rejected outright while `Open`.
    pub rejected: u64,
    /// When the most recent failure was recorded.
    pub last_failure: Option<DateTime<Utc>>,
    /// When the state last transitioned.
    pub last_state_change: Option<DateTime<Utc>>,
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl CircuitBreakerMetrics {
    /// `failures / (failures + successes)`, `0.0` when no requests were
    /// recorded.
    pub fn failure_rate(&self) -> f64 {
        let total = self.failures + self.successes;
        if total == 0 {
            0.0
        } else {
            self.failures as f64 / total as f64
        }
    }
}

/// A circuit breaker guarding calls to an unreliable dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Behavior<CircuitState>,
    counters: Mutex<Counters>,
    last_state_change: Mutex<DateTime<Utc>>,
    last_failure: Mutex<Option<DateTime<Utc>>>,
    rejected: Mutex<u64>,
}

impl CircuitBreaker {
    /// Construct a breaker, starting `Closed` as of `now`.
    pub fn new(config: CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            state: Behavior::new(CircuitState::Closed),
            counters: Mutex::new(Counters::default()),
            last_state_change: Mutex::new(now),
            last_failure: Mutex::new(None),
            rejected: Mutex::new(0),
        }
    }

    /// Snapshot the breaker's current counters as of `now`.
    pub fn metrics(&self, now: DateTime<Utc>) -> CircuitBreakerMetrics {
        let counters = self.counters.lock();
        CircuitBreakerMetrics {
            state: self.state.get(),
            failures: counters.failures,
            successes: counters.successes,
            rejected: *self.rejected.lock(),
            last_failure: *self.last_failure.lock(),
            last_state_change: Some(*self.last_state_change.lock()),
            timestamp: now,
        }
    }

    /// Subscribe to state transitions. Emits on distinct transitions only.
    pub fn state_stream(&self) -> watch::Receiver<CircuitState> {
        self.state.subscribe()
    }

    /// Current state, re-evaluating the `Open` → `HalfOpen` timeout
    /// against `now` as a side effect: the first state query after
    /// `open_duration` has elapsed performs the transition.
    pub fn state(&self, now: DateTime<Utc>) -> CircuitState {
        if !self.config.enabled {
            return CircuitState::Closed;
        }
        if self.state.get() == CircuitState::Open {
            let elapsed = now - *self.last_state_change.lock();
            if elapsed >= self.config.open_duration {
                self.transition_to(CircuitState::HalfOpen, now);
                self.counters.lock().half_open_in_flight = 0;
            }
        }
        self.state.get()
    }

    /// Whether a request may proceed right now.
    pub fn allows_request(&self, now: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return true;
        }
        match self.state(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.counters.lock().half_open_in_flight < self.config.half_open_max,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        match self.state(now) {
            CircuitState::Closed => {
                self.counters.lock().successes += 1;
            }
            CircuitState::HalfOpen => {
                let mut counters = self.counters.lock();
                counters.successes += 1;
                if counters.successes >= self.config.success_threshold {
                    drop(counters);
                    self.reset_counters();
                    self.transition_to(CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, now: DateTime<Utc>) {
        if !self.config.enabled {
            return;
        }
        *self.last_failure.lock() = Some(now);
        match self.state(now) {
            CircuitState::Closed => {
                let mut counters = self.counters.lock();
                counters.failures += 1;
                if counters.failures >= self.config.failure_threshold {
                    drop(counters);
                    self.transition_to(CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Run `work`, recording its outcome, rejecting outright when the
    /// breaker disallows the request.
    pub async fn execute<F, Fut, T>(&self, now: DateTime<Utc>, work: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        if !self.allows_request(now) {
            *self.rejected.lock() += 1;
            let retry_after = self.retry_after(now);
            return Err(StoreError::CircuitBreakerOpen { retry_after });
        }
        if self.state(now) == CircuitState::HalfOpen {
            self.counters.lock().half_open_in_flight += 1;
        }
        let result = work().await;
        match &result {
            Ok(_) => self.record_success(now),
            Err(_) => self.record_failure(now),
        }
        if self.state.get() == CircuitState::HalfOpen {
            let mut counters = self.counters.lock();
            counters.half_open_in_flight = counters.half_open_in_flight.saturating_sub(1);
        }
        result
    }

    fn retry_after(&self, now: DateTime<Utc>) -> std::time::Duration {
        let elapsed = now - *self.last_state_change.lock();
        let remaining = self.config.open_duration - elapsed;
        if remaining <= chrono::Duration::zero() {
            std::time::Duration::ZERO
        } else {
            remaining.to_std().unwrap_or(std::time::Duration::ZERO)
        }
    }

    fn reset_counters(&self) {
        *self.counters.lock() = Counters::default();
    }

    fn transition_to(&self, next: CircuitState, now: DateTime<Utc>) {
        if self.state.get() == next {
            return;
        }
        self.state.set(next);
        *self.last_state_change.lock() = now;
        if next == CircuitState::Open {
            self.reset_counters();
        }
    }
}

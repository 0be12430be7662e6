//! Degradation mode lattice and the manager that tracks/transitions it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::reliability::circuit_breaker::CircuitState;
use crate::reliability::health::HealthStatus;
use crate::util::Behavior;

/// Service degradation mode. Declaration order is `Normal < CacheOnly <
/// ReadOnly < Offline`, so the derived `Ord` ranks `Offline` highest and
/// worst-of-several modes is a plain `max()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum DegradationMode {
    /// Full read/write against cache and network.
    Normal,
    /// Reads and writes stay local; network sync is suspended.
    CacheOnly,
    /// Only reads are served; writes are rejected.
    ReadOnly,
    /// No operations are served.
    Offline,
}

impl DegradationMode {
    /// The worst (highest-ranked) mode among `modes`. Absent any modes,
    /// [`DegradationMode::Normal`]; since `Normal` is the lowest rank it
    /// never changes the max of a non-empty set either.
    pub fn worst(modes: &[DegradationMode]) -> DegradationMode {
        modes.iter().copied().max().unwrap_or(DegradationMode::Normal)
    }

    /// Whether reads are served in this mode (all but `Offline`).
    pub fn allows_reads(self) -> bool {
        self != DegradationMode::Offline
    }

    /// Whether writes are served in this mode (`Normal` only).
    pub fn allows_writes(self) -> bool {
        self == DegradationMode::Normal
    }

    /// Whether calls reach the backend at all (`Normal` and `ReadOnly`;
    /// `CacheOnly` suspends network sync, `Offline` serves nothing).
    pub fn allows_backend_calls(self) -> bool {
        matches!(self, DegradationMode::Normal | DegradationMode::ReadOnly)
    }
}

/// Degradation manager tuning.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DegradationConfig {
    /// Minimum time a mode must hold before `recover()` may act.
    #[serde(with = "crate::config::chrono_duration_seconds")]
    pub cooldown: chrono::Duration,
    /// When `true`, the manager wires itself to an external circuit
    /// breaker state stream and health status, auto-degrading/recovering.
    pub auto_mode: bool,
    /// Mode entered when a circuit breaker opens under auto mode.
    pub fallback_mode: DegradationMode,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            cooldown: chrono::Duration::seconds(30),
            auto_mode: false,
            fallback_mode: DegradationMode::CacheOnly,
        }
    }
}

impl DegradationConfig {
    /// Validate invariants: cooldown must be positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.cooldown <= chrono::Duration::zero() {
            return Err("cooldown must be positive".to_string());
        }
        Ok(())
    }
}

/// Tracks the current degradation mode and its transition history.
pub struct DegradationManager {
    config: DegradationConfig,
    mode: Behavior<DegradationMode>,
    degradation_count: Mutex<u64>,
    recovery_count: Mutex<u64>,
    last_mode_change: Mutex<DateTime<Utc>>,
}

impl DegradationManager {
    /// Construct a manager starting `Normal` as of `now`.
    pub fn new(config: DegradationConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            mode: Behavior::new(DegradationMode::Normal),
            degradation_count: Mutex::new(0),
            recovery_count: Mutex::new(0),
            last_mode_change: Mutex::new(now),
        }
    }

    /// Current mode.
    pub fn current_mode(&self) -> DegradationMode {
        self.mode.get()
    }

    /// Subscribe to mode transitions.
    pub fn mode_stream(&self) -> watch::Receiver<DegradationMode> {
        self.mode.subscribe()
    }

    /// Transition to `mode`. Idempotent: setting the current mode does
    /// not bump any counter or reset the cooldown clock.
    pub fn degrade(&self, mode: DegradationMode, now: DateTime<Utc>) {
        if self.mode.get() == mode {
            return;
        }
        self.mode.set(mode);
        *self.last_mode_change.lock() = now;
        *self.degradation_count.lock() += 1;
    }

    /// Transition toward `to` (default `Normal`), subject to the same
    /// idempotency rule as [`DegradationManager::degrade`].
    pub fn recover(&self, to: DegradationMode, now: DateTime<Utc>) {
        if self.mode.get() == to {
            return;
        }
        self.mode.set(to);
        *self.last_mode_change.lock() = now;
        *self.recovery_count.lock() += 1;
    }

    /// Whether enough time has passed since the last mode change to
    /// permit a recovery attempt.
    pub fn can_recover(&self, now: DateTime<Utc>) -> bool {
        now - *self.last_mode_change.lock() >= self.config.cooldown
    }

    /// Number of `degrade` transitions so far.
    pub fn degradation_count(&self) -> u64 {
        *self.degradation_count.lock()
    }

    /// Number of `recover` transitions so far.
    pub fn recovery_count(&self) -> u64 {
        *self.recovery_count.lock()
    }

    /// React to a circuit breaker transition under auto mode. A no-op if
    /// `auto_mode` is disabled.
    pub fn on_circuit_state(&self, state: CircuitState, now: DateTime<Utc>) {
        if !self.config.auto_mode {
            return;
        }
        match state {
            CircuitState::Open => self.degrade(self.config.fallback_mode, now),
            CircuitState::Closed if self.can_recover(now) => self.recover(DegradationMode::Normal, now),
            _ => {}
        }
    }

    /// React to a health status change.
    pub fn on_health_change(&self, status: HealthStatus, now: DateTime<Utc>) {
        match status {
            HealthStatus::Unhealthy => self.degrade(self.config.fallback_mode, now),
            HealthStatus::Healthy if self.can_recover(now) => self.recover(DegradationMode::Normal, now),
            HealthStatus::Healthy | HealthStatus::Degraded => {}
        }
    }
}

//! Memory pressure levels and the handlers that derive/assert them.
//!
//! Broadcasts use the shared [`crate::util::Behavior`] "latest value"
//! wrapper.

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::util::Behavior;

/// Memory pressure severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// No pressure.
    None,
    /// Approaching capacity; a small eviction pass is warranted.
    Moderate,
    /// Over the critical threshold; an aggressive eviction pass is warranted.
    Critical,
    /// At or over capacity; unpinned items should be dropped.
    Emergency,
}

impl PressureLevel {
    /// Whether this level is `other` or more severe.
    pub fn at_least(self, other: PressureLevel) -> bool {
        self >= other
    }

    /// Whether this level warrants an eviction pass (anything but `None`).
    pub fn should_evict(self) -> bool {
        self != PressureLevel::None
    }

    /// Whether this level is the most severe.
    pub fn is_emergency(self) -> bool {
        self == PressureLevel::Emergency
    }
}

/// Something that derives or asserts a [`PressureLevel`] and broadcasts
/// changes to subscribers, deduplicated (testable property 4: no two
/// consecutive equal emissions).
pub trait MemoryPressureHandler: Send + Sync {
    /// Feed in the current byte usage and return the (possibly updated)
    /// level. A handler that doesn't derive level from bytes (e.g.
    /// [`ManualMemoryPressureHandler`]) simply ignores the input.
    fn update(&self, current_bytes: u64) -> PressureLevel;

    /// The most recently computed/asserted level.
    fn level(&self) -> PressureLevel;

    /// Subscribe to level changes. The receiver immediately observes the
    /// current value, then only future changes.
    fn subscribe(&self) -> watch::Receiver<PressureLevel>;
}

/// Derives level from `current_bytes / max_bytes` against two fractional
/// thresholds. `max_bytes = None` models "unlimited": level is
/// permanently [`PressureLevel::None`].
pub struct ThresholdMemoryPressureHandler {
    max_bytes: Option<u64>,
    moderate_frac: f64,
    critical_frac: f64,
    behavior: Behavior<PressureLevel>,
}

impl ThresholdMemoryPressureHandler {
    /// Construct a handler. `moderate_frac` and `critical_frac` are
    /// fractions of `max_bytes` (e.g. `0.7`, `0.9`).
    pub fn new(max_bytes: Option<u64>, moderate_frac: f64, critical_frac: f64) -> Self {
        Self {
            max_bytes,
            moderate_frac,
            critical_frac,
            behavior: Behavior::new(PressureLevel::None),
        }
    }

    fn compute(&self, current_bytes: u64) -> PressureLevel {
        let Some(max_bytes) = self.max_bytes else {
            return PressureLevel::None;
        };
        if max_bytes == 0 {
            return PressureLevel::Emergency;
        }
        let ratio = current_bytes as f64 / max_bytes as f64;
        if ratio >= 1.0 {
            PressureLevel::Emergency
        } else if ratio >= self.critical_frac {
            PressureLevel::Critical
        } else if ratio >= self.moderate_frac {
            PressureLevel::Moderate
        } else {
            PressureLevel::None
        }
    }
}

impl MemoryPressureHandler for ThresholdMemoryPressureHandler {
    fn update(&self, current_bytes: u64) -> PressureLevel {
        let level = self.compute(current_bytes);
        self.behavior.set(level);
        level
    }

    fn level(&self) -> PressureLevel {
        self.behavior.get()
    }

    fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.behavior.subscribe()
    }
}

/// A handler whose level is asserted directly rather than derived from
/// byte counts, for tests and manual operator override.
pub struct ManualMemoryPressureHandler {
    behavior: Behavior<PressureLevel>,
    asserted: Mutex<PressureLevel>,
}

impl ManualMemoryPressureHandler {
    /// Construct a handler starting at [`PressureLevel::None`].
    pub fn new() -> Self {
        Self {
            behavior: Behavior::new(PressureLevel::None),
            asserted: Mutex::new(PressureLevel::None),
        }
    }

    /// Directly assert a level, publishing if it changed.
    pub fn assert_level(&self, level: PressureLevel) {
        *self.asserted.lock() = level;
        self.behavior.set(level);
    }
}

impl Default for ManualMemoryPressureHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPressureHandler for ManualMemoryPressureHandler {
    fn update(&self, _current_bytes: u64) -> PressureLevel {
        self.level()
    }

    fn level(&self) -> PressureLevel {
        *self.asserted.lock()
    }

    fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.behavior.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_capacity_is_always_none() {
        let handler = ThresholdMemoryPressureHandler::new(None, 0.7, 0.9);
        assert_eq!(handler.update(u64::MAX), PressureLevel::None);
    }

    #[test]
    fn thresholds_map_to_expected_levels() {
        let handler = ThresholdMemoryPressureHandler::new(Some(100), 0.7, 0.9);
        assert_eq!(handler.update(50), PressureLevel::None);
        assert_eq!(handler.update(75), PressureLevel::Moderate);
        assert_eq!(handler.update(95), PressureLevel::Critical);
        assert_eq!(handler.update(100), PressureLevel::Emergency);
    }

    #[tokio::test]
    async fn emissions_are_deduplicated() {
        // Testable property 4.
        let handler = ThresholdMemoryPressureHandler::new(Some(100), 0.7, 0.9);
        let mut rx = handler.subscribe();
        handler.update(50); // None -> None, no emission
        handler.update(80); // None -> Moderate
        handler.update(81); // Moderate -> Moderate, no emission
        handler.update(100); // Moderate -> Emergency

        let mut seen = Vec::new();
        while rx.has_changed().unwrap_or(false) {
            seen.push(*rx.borrow_and_update());
        }
        assert_eq!(seen, vec![PressureLevel::Moderate, PressureLevel::Emergency]);
    }

    #[test]
    fn manual_handler_ignores_byte_input() {
        let handler = ManualMemoryPressureHandler::new();
        handler.assert_level(PressureLevel::Critical);
        assert_eq!(handler.update(0), PressureLevel::Critical);
    }

    #[test]
    fn level_predicates() {
        assert!(PressureLevel::Critical.at_least(PressureLevel::Moderate));
        assert!(!PressureLevel::Moderate.at_least(PressureLevel::Critical));
        assert!(!PressureLevel::None.should_evict());
        assert!(PressureLevel::Moderate.should_evict());
        assert!(PressureLevel::Emergency.is_emergency());
        assert!(!PressureLevel::Critical.is_emergency());
    }
}

//! Small shared primitives used across the reliability and memory layers.

use tokio::sync::watch;

/// A `watch`-channel-backed "latest value" broadcast (a BehaviorSubject):
/// new subscribers immediately observe the current value, and `set` only
/// notifies subscribers when the value actually changes. Shared by the
/// pressure, circuit-breaker, degradation, and health status streams.
pub struct Behavior<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Behavior<T> {
    /// Construct a behavior seeded with `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value. Subscribers are only woken if it changed.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    /// Subscribe to this behavior's value stream.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_current_value_immediately() {
        let behavior = Behavior::new(1);
        let rx = behavior.subscribe();
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test]
    async fn set_deduplicates_equal_values() {
        let behavior = Behavior::new(1);
        let mut rx = behavior.subscribe();
        behavior.set(1);
        assert!(!rx.has_changed().unwrap());
        behavior.set(2);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 2);
    }
}

//! Observable state cells (§9 design notes).
//!
//! The original app binds UI state to a reactive publisher. We abstract that
//! as a value plus a subscribe-for-change-notifications capability, backed by
//! a [`tokio::sync::watch`] channel. Values are read/written only from the
//! owning task (the "single logical executor" of §5); the watch channel lets
//! other tasks (a UI shell, a test harness) observe transitions without
//! touching the owner's state directly.

use tokio::sync::watch;

/// A value that can be read, written, and subscribed to for change
/// notifications.
#[derive(Debug)]
pub struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    /// Creates a new observable seeded with `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Sets a new value, notifying subscribers only if it actually changed.
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Subscribes for future change notifications. The returned receiver
    /// immediately observes the current value as "seen" — callers should
    /// read [`Self::get`] once up front and then `.changed().await` in a
    /// loop.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_observes_changes() {
        let obs = Observable::new(1u32);
        let mut rx = obs.subscribe();

        obs.set(2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn setting_same_value_does_not_mark_changed() {
        let obs = Observable::new("idle".to_string());
        let rx = obs.subscribe();
        obs.set("idle".to_string());
        assert!(!rx.has_changed().unwrap());
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Cooperative stop flag shared between a session task and its handle.
///
/// Once stopped, every retry and watchdog path in the session checks the flag
/// and no-ops; in-flight I/O is abandoned at the next `select!` point.
#[derive(Clone, Default)]
pub struct Stopper {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Stopper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        if !self.flag.swap(true, Ordering::Relaxed) {
            self.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Resolves when [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        loop {
            if self.is_stopped() {
                return;
            }
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent_and_observable() {
        let stopper = Stopper::new();
        assert!(!stopper.is_stopped());

        stopper.stop();
        stopper.stop();
        assert!(stopper.is_stopped());

        // Must resolve immediately for an already-stopped flag.
        stopper.stopped().await;
    }
}

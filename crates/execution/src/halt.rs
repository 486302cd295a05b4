//! Manual halt signal shared between the coordinator and its operators.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

/// Cloneable handle that halts a coordinator.
///
/// Halting wakes every pending backoff or poll wait at once.
#[derive(Debug, Clone)]
pub struct HaltHandle {
    tx: Arc<watch::Sender<Option<String>>>,
}

impl Default for HaltHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl HaltHandle {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the halt. The first reason wins.
    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            warn!(%reason, "Coordinator halt raised");
            *current = Some(reason);
            true
        });
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.tx.borrow().is_some()
    }

    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Sleeps for `delay` unless halted first.
    ///
    /// Returns `false` when the wait was cut short by a halt.
    pub async fn sleep(&self, delay: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        if rx.borrow_and_update().is_some() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            _ = rx.wait_for(Option::is_some) => false,
        }
    }
}

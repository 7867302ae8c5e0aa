//! Pause gate for the worker pool
//!
//! A binary awaitable event with "open" as the initial state. Workers wait
//! on the gate between records; `pause()` closes it, `resume()` reopens it.
//! Setting while nobody waits and reopening while waiters are suspended are
//! both safe.

use tokio::sync::watch;

/// Resettable gate controlling worker progress
#[derive(Debug, Clone)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseGate {
    /// Create an open gate
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    /// Close the gate; subsequent `wait_open` calls suspend
    pub fn pause(&self) {
        let _ = self.tx.send(false);
    }

    /// Reopen the gate, releasing all suspended waiters
    pub fn resume(&self) {
        let _ = self.tx.send(true);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        !*self.tx.borrow()
    }

    /// Suspend until the gate is open; returns immediately when it already is
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // wait_for only fails when the sender is dropped, which cannot
        // happen while `self` holds it
        let _ = rx.wait_for(|open| *open).await;
    }
}

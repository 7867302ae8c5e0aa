//! Single-flight coalescing of concurrent discoveries
//!
//! Maps `domain -> in-flight lookup` so only one strategy fan-out runs per
//! domain at a time. The first caller to register becomes the producer; the
//! shard lock inside the concurrent map makes insert-or-observe atomic, so
//! two racing callers can never both believe they are first.

use super::ServerConfig;
use crate::error::CheckError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How an in-flight lookup ended
#[derive(Debug, Clone)]
enum PendingOutcome {
    Ready(Vec<ServerConfig>),
    /// Producer gave up (failure or cancellation); waiters degrade to empty
    Abandoned,
}

struct PendingEntry {
    tx: Arc<watch::Sender<Option<PendingOutcome>>>,
}

/// Handle a non-producing caller awaits on
pub struct PendingHandle {
    rx: watch::Receiver<Option<PendingOutcome>>,
}

impl PendingHandle {
    /// Wait for the producer's result
    ///
    /// An abandoned lookup (producer failed, was cancelled, or panicked)
    /// resolves to an empty list; only the waiter's own cancellation is an
    /// error.
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerConfig>, CheckError> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            changed = self.rx.wait_for(|o| o.is_some()) => changed,
        };
        match outcome {
            Ok(value) => match value.as_ref() {
                Some(PendingOutcome::Ready(configs)) => Ok(configs.clone()),
                Some(PendingOutcome::Abandoned) | None => Ok(Vec::new()),
            },
            // Sender dropped without completing
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// Concurrent map of in-flight lookups per domain
#[derive(Default)]
pub struct PendingDiscoveryTracker {
    inner: DashMap<String, PendingEntry>,
}

impl PendingDiscoveryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically register or observe a lookup for `domain`
    ///
    /// Returns `(true, handle)` when the caller registered a new lookup and
    /// must eventually call [`complete`](Self::complete) or
    /// [`cancel`](Self::cancel), or `(false, handle)` when another caller's
    /// lookup is already in flight.
    #[must_use]
    pub fn get_or_create(&self, domain: &str) -> (bool, PendingHandle) {
        match self.inner.entry(domain.to_string()) {
            Entry::Occupied(entry) => (
                false,
                PendingHandle {
                    rx: entry.get().tx.subscribe(),
                },
            ),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(PendingEntry { tx: Arc::new(tx) });
                (true, PendingHandle { rx })
            }
        }
    }

    /// Resolve the lookup with `configs` and release all waiters
    pub fn complete(&self, domain: &str, configs: Vec<ServerConfig>) {
        if let Some((_, entry)) = self.inner.remove(domain) {
            let _ = entry.tx.send(Some(PendingOutcome::Ready(configs)));
        }
    }

    /// Resolve the lookup as failed; waiters receive an empty list
    pub fn fail(&self, domain: &str) {
        if let Some((_, entry)) = self.inner.remove(domain) {
            let _ = entry.tx.send(Some(PendingOutcome::Abandoned));
        }
    }

    /// Resolve the lookup as cancelled; waiters receive an empty list
    pub fn cancel(&self, domain: &str) {
        self.fail(domain);
    }

    /// Number of lookups currently in flight
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{ConfigSource, SecurityMode, UsernameFormat};
    use std::time::Duration;

    fn config(host: &str) -> ServerConfig {
        ServerConfig::new(
            host,
            993,
            SecurityMode::Ssl,
            UsernameFormat::Email,
            ConfigSource::Ispdb,
        )
    }

    #[tokio::test]
    async fn test_first_caller_is_producer() {
        let tracker = PendingDiscoveryTracker::new();

        let (first, _h1) = tracker.get_or_create("example.com");
        let (second, _h2) = tracker.get_or_create("example.com");
        let (other, _h3) = tracker.get_or_create("other.com");

        assert!(first);
        assert!(!second);
        assert!(other);
        assert_eq!(tracker.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_complete_releases_waiters() {
        let tracker = Arc::new(PendingDiscoveryTracker::new());
        let (_first, _producer_handle) = tracker.get_or_create("example.com");

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let (is_first, handle) = tracker.get_or_create("example.com");
                assert!(!is_first);
                tokio::spawn(async move { handle.wait(&CancellationToken::new()).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        tracker.complete("example.com", vec![config("imap.example.com")]);

        for waiter in waiters {
            let result = waiter.await.unwrap().unwrap();
            assert_eq!(result.len(), 1);
            assert_eq!(result[0].hostname, "imap.example.com");
        }
        assert_eq!(tracker.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_completion_removes_entry() {
        let tracker = PendingDiscoveryTracker::new();
        let (_, _handle) = tracker.get_or_create("example.com");
        tracker.complete("example.com", vec![]);

        // A later lookup starts fresh
        let (is_first, _) = tracker.get_or_create("example.com");
        assert!(is_first);
    }

    #[tokio::test]
    async fn test_abandoned_lookup_yields_empty() {
        let tracker = PendingDiscoveryTracker::new();
        let (_, _producer) = tracker.get_or_create("example.com");
        let (_, waiter) = tracker.get_or_create("example.com");

        tracker.cancel("example.com");
        let result = waiter.wait(&CancellationToken::new()).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_cancellation_is_an_error() {
        let tracker = PendingDiscoveryTracker::new();
        let (_, _producer) = tracker.get_or_create("example.com");
        let (_, waiter) = tracker.get_or_create("example.com");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = waiter.wait(&cancel).await;
        assert!(matches!(result, Err(CheckError::Cancelled)));
    }

    #[tokio::test]
    async fn test_complete_unknown_domain_is_noop() {
        let tracker = PendingDiscoveryTracker::new();
        tracker.complete("nobody-asked.com", vec![config("x")]);
        tracker.fail("nobody-asked.com");
        assert_eq!(tracker.in_flight(), 0);
    }
}

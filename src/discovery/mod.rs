//! Mail-server discovery
//!
//! Locates candidate IMAP server configurations for a domain by fanning out
//! over independent strategies (directory lookup, well-known autoconfig
//! URLs, MX-derived provider lookup, live probing), deduplicating the
//! results and caching them in a durable registry.
//!
//! Lookup order per domain:
//!
//! 1. fast path - a non-expired verified config short-circuits everything
//! 2. cached path - non-expired candidates, sorted by priority
//! 3. single-flight - concurrent lookups for the same domain coalesce onto
//!    the first caller's fan-out
//! 4. strategy fan-out, dedup, persist, complete the pending lookup
//!
//! Registry and strategy failures degrade to "no cache" and "no results";
//! only cancellation propagates to callers.

use crate::constants::discovery::{CANDIDATE_TTL, STRATEGY_TIMEOUT, VERIFIED_TTL};
use crate::error::CheckError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub mod autoconfig;
pub mod pending;
pub mod registry;
pub mod strategies;

pub use pending::PendingDiscoveryTracker;
pub use registry::ServerRegistry;
pub use strategies::DiscoveryStrategy;

/// Transport security for a candidate server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SecurityMode {
    #[default]
    Ssl,
    StartTls,
    None,
}

impl SecurityMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssl => "SSL",
            Self::StartTls => "STARTTLS",
            Self::None => "NONE",
        }
    }

    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "SSL" => Self::Ssl,
            "STARTTLS" => Self::StartTls,
            _ => Self::None,
        }
    }
}

/// How the username is derived from the address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UsernameFormat {
    /// Full address, e.g. `alice@example.com`
    #[default]
    Email,
    /// Local part only, e.g. `alice`
    LocalPart,
}

impl UsernameFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::LocalPart => "LOCAL_PART",
        }
    }

    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "LOCAL_PART" => Self::LocalPart,
            _ => Self::Email,
        }
    }
}

/// Where a candidate came from; doubles as its authority ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Ispdb,
    Autoconfig,
    Mx,
    Guess,
}

impl ConfigSource {
    /// Lower is more authoritative
    #[must_use]
    pub fn priority(&self) -> u8 {
        match self {
            Self::Ispdb => 1,
            Self::Autoconfig => 2,
            Self::Mx => 3,
            Self::Guess => 4,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ispdb => "ispdb",
            Self::Autoconfig => "autoconfig",
            Self::Mx => "mx",
            Self::Guess => "guess",
        }
    }

    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "ispdb" => Self::Ispdb,
            "autoconfig" => Self::Autoconfig,
            "mx" => Self::Mx,
            _ => Self::Guess,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub security: SecurityMode,
    pub username_format: UsernameFormat,
    pub source: ConfigSource,
    /// Authority rank; lower is tried first
    pub priority: u8,
}

impl ServerConfig {
    #[must_use]
    pub fn new(
        hostname: impl Into<String>,
        port: u16,
        security: SecurityMode,
        username_format: UsernameFormat,
        source: ConfigSource,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            security,
            username_format,
            source,
            priority: source.priority(),
        }
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}, {})",
            self.hostname,
            self.port,
            self.security.as_str(),
            self.source
        )
    }
}

/// Group candidates by `(lowercased hostname, port)`, keep the most
/// authoritative entry per group, and order the result by priority
#[must_use]
pub fn dedupe_candidates(candidates: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut best: HashMap<(String, u16), ServerConfig> = HashMap::new();
    for candidate in candidates {
        let key = (candidate.hostname.to_lowercase(), candidate.port);
        match best.get(&key) {
            Some(existing) if existing.priority <= candidate.priority => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }
    let mut result: Vec<ServerConfig> = best.into_values().collect();
    result.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.hostname.cmp(&b.hostname))
            .then_with(|| a.port.cmp(&b.port))
    });
    result
}

/// Discovery orchestrator shared by all workers of a run
pub struct DiscoveryService {
    registry: Arc<ServerRegistry>,
    pending: PendingDiscoveryTracker,
    strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    strategy_timeout: Duration,
    candidate_ttl: Duration,
    verified_ttl: Duration,
}

impl DiscoveryService {
    /// Build a service with the full default strategy set
    pub fn new(registry: Arc<ServerRegistry>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(STRATEGY_TIMEOUT)
            .build()?;
        let strategies: Vec<Arc<dyn DiscoveryStrategy>> = vec![
            Arc::new(strategies::DirectoryLookup::new(client.clone())),
            Arc::new(strategies::WellKnownLookup::new(client.clone())),
            Arc::new(strategies::MxProviderLookup::new(client)?),
            Arc::new(strategies::ProbeStrategy::new()),
        ];
        Ok(Self::with_strategies(registry, strategies))
    }

    /// Build a service over an explicit strategy set (tests, custom probes)
    #[must_use]
    pub fn with_strategies(
        registry: Arc<ServerRegistry>,
        mut strategies: Vec<Arc<dyn DiscoveryStrategy>>,
    ) -> Self {
        strategies.sort_by_key(|s| s.priority());
        Self {
            registry,
            pending: PendingDiscoveryTracker::new(),
            strategies,
            strategy_timeout: STRATEGY_TIMEOUT,
            candidate_ttl: CANDIDATE_TTL,
            verified_ttl: VERIFIED_TTL,
        }
    }

    /// Override the per-strategy timeout (tests)
    #[must_use]
    pub fn with_strategy_timeout(mut self, timeout: Duration) -> Self {
        self.strategy_timeout = timeout;
        self
    }

    /// Candidate configurations for `domain`, most authoritative first
    ///
    /// Only cancellation surfaces as an error; everything else degrades to
    /// a (possibly empty) list.
    pub async fn get_candidates(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerConfig>, CheckError> {
        let domain = domain.to_lowercase();

        // Fast path: a verified config wins outright
        match self.registry.get_verified(&domain).await {
            Ok(Some(config)) => return Ok(vec![config]),
            Ok(None) => {}
            Err(e) => debug!("Registry read failed for '{}': {}", domain, e),
        }

        // Cached path: previously discovered candidates
        match self.registry.get_candidates(&domain).await {
            Ok(cached) if !cached.is_empty() => return Ok(cached),
            Ok(_) => {}
            Err(e) => debug!("Registry read failed for '{}': {}", domain, e),
        }

        let (is_first, handle) = self.pending.get_or_create(&domain);
        if !is_first {
            debug!("Coalescing lookup for '{}' onto in-flight discovery", domain);
            return handle.wait(cancel).await;
        }

        let discovered = match self.run_strategies(&domain, cancel).await {
            Ok(list) => list,
            Err(e) => {
                self.pending.cancel(&domain);
                return Err(e);
            }
        };
        let deduped = dedupe_candidates(discovered);

        if !deduped.is_empty() {
            if let Err(e) = self
                .registry
                .set_candidates(&domain, &deduped, self.candidate_ttl)
                .await
            {
                warn!("Failed to cache candidates for '{}': {}", domain, e);
            }
        }

        self.pending.complete(&domain, deduped.clone());
        Ok(deduped)
    }

    /// Record that authentication succeeded against `config`
    ///
    /// Subsequent lookups take the fast path until the entry expires.
    pub async fn mark_verified(&self, domain: &str, config: &ServerConfig) {
        let domain = domain.to_lowercase();
        if let Err(e) = self
            .registry
            .set_verified(&domain, config, self.verified_ttl)
            .await
        {
            warn!("Failed to record verified config for '{}': {}", domain, e);
        }
    }

    async fn run_strategies(
        &self,
        domain: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServerConfig>, CheckError> {
        let mut collected = Vec::new();

        for strategy in &self.strategies {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(CheckError::Cancelled),
                result = tokio::time::timeout(
                    self.strategy_timeout,
                    strategy.discover(domain, cancel),
                ) => result,
            };

            match attempt {
                Ok(found) => {
                    debug!(
                        "Strategy '{}' found {} candidate(s) for '{}'",
                        strategy.name(),
                        found.len(),
                        domain
                    );
                    collected.extend(found);
                }
                Err(_) => {
                    debug!(
                        "Strategy '{}' timed out for '{}' after {:?}",
                        strategy.name(),
                        domain,
                        self.strategy_timeout
                    );
                }
            }
        }

        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn candidate(host: &str, port: u16, source: ConfigSource) -> ServerConfig {
        ServerConfig::new(
            host,
            port,
            SecurityMode::Ssl,
            UsernameFormat::Email,
            source,
        )
    }

    #[test]
    fn test_dedupe_keeps_most_authoritative() {
        let deduped = dedupe_candidates(vec![
            candidate("imap.x.com", 993, ConfigSource::Autoconfig),
            candidate("IMAP.x.com", 993, ConfigSource::Ispdb),
            candidate("imap.x.com", 143, ConfigSource::Mx),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].port, 993);
        assert_eq!(deduped[0].source, ConfigSource::Ispdb);
        assert_eq!(deduped[0].hostname, "IMAP.x.com");
        assert_eq!(deduped[1].port, 143);
        assert_eq!(deduped[1].source, ConfigSource::Mx);
    }

    #[test]
    fn test_dedupe_sorts_by_priority() {
        let deduped = dedupe_candidates(vec![
            candidate("guess.x.com", 993, ConfigSource::Guess),
            candidate("mx.x.com", 993, ConfigSource::Mx),
            candidate("db.x.com", 993, ConfigSource::Ispdb),
        ]);
        let priorities: Vec<u8> = deduped.iter().map(|c| c.priority).collect();
        assert_eq!(priorities, vec![1, 3, 4]);
    }

    #[test]
    fn test_source_priorities() {
        assert_eq!(ConfigSource::Ispdb.priority(), 1);
        assert_eq!(ConfigSource::Autoconfig.priority(), 2);
        assert_eq!(ConfigSource::Mx.priority(), 3);
        assert_eq!(ConfigSource::Guess.priority(), 4);
    }

    #[test]
    fn test_source_string_round_trip() {
        for source in [
            ConfigSource::Ispdb,
            ConfigSource::Autoconfig,
            ConfigSource::Mx,
            ConfigSource::Guess,
        ] {
            assert_eq!(ConfigSource::from_str_lossy(source.as_str()), source);
        }
    }

    /// Strategy that counts invocations and returns a fixed candidate slowly
    struct CountingStrategy {
        calls: Arc<AtomicU64>,
        delay: Duration,
    }

    #[async_trait]
    impl DiscoveryStrategy for CountingStrategy {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn priority(&self) -> u8 {
            1
        }

        async fn discover(&self, domain: &str, _cancel: &CancellationToken) -> Vec<ServerConfig> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            vec![ServerConfig::new(
                format!("imap.{}", domain),
                993,
                SecurityMode::Ssl,
                UsernameFormat::Email,
                ConfigSource::Ispdb,
            )]
        }
    }

    fn service_with_counting(
        dir: &std::path::Path,
        delay: Duration,
    ) -> (DiscoveryService, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let registry = Arc::new(ServerRegistry::new(dir.join("registry.db")));
        let service = DiscoveryService::with_strategies(
            registry,
            vec![Arc::new(CountingStrategy {
                calls: Arc::clone(&calls),
                delay,
            })],
        );
        (service, calls)
    }

    #[tokio::test]
    async fn test_single_flight_coalesces_concurrent_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let (service, calls) = service_with_counting(dir.path(), Duration::from_millis(100));
        let service = Arc::new(service);
        let cancel = CancellationToken::new();

        let lookups: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                let cancel = cancel.clone();
                tokio::spawn(async move { service.get_candidates("Example.COM", &cancel).await })
            })
            .collect();

        let mut results = Vec::new();
        for lookup in lookups {
            results.push(lookup.await.unwrap().unwrap());
        }

        // Exactly one fan-out ran; everyone saw identical lists
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert_eq!(result, &results[0]);
            assert_eq!(result.len(), 1);
            assert_eq!(result[0].hostname, "imap.example.com");
        }
    }

    #[tokio::test]
    async fn test_second_lookup_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (service, calls) = service_with_counting(dir.path(), Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let first = service.get_candidates("example.com", &cancel).await.unwrap();
        let second = service.get_candidates("example.com", &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_verified_fast_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let (service, calls) = service_with_counting(dir.path(), Duration::from_millis(1));
        let cancel = CancellationToken::new();

        let verified = candidate("verified.example.com", 993, ConfigSource::Ispdb);
        service.mark_verified("example.com", &verified).await;

        let result = service.get_candidates("EXAMPLE.com", &cancel).await.unwrap();
        assert_eq!(result, vec![verified]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_strategy_timeout_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _calls) = service_with_counting(dir.path(), Duration::from_secs(60));
        let service = service.with_strategy_timeout(Duration::from_millis(50));
        let cancel = CancellationToken::new();

        let result = service.get_candidates("slow.example", &cancel).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (service, _calls) = service_with_counting(dir.path(), Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.get_candidates("example.com", &cancel).await;
        assert!(matches!(result, Err(CheckError::Cancelled)));
    }
}

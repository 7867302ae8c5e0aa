//! MX-derived provider lookup
//!
//! Hosted domains often carry no autoconfig of their own but point their MX
//! at a large provider. This strategy resolves the domain's MX records,
//! takes the record with the lowest `preference` value, derives a two-label
//! provider domain from the exchange host (`aspmx.l.google.com` ->
//! `google.com`) and, when that differs from the original domain, repeats
//! the directory and well-known lookups against the provider.
//!
//! The two-label derivation is knowingly naive for multi-label registries
//! like `.co.uk`; extending it would change which providers are found, so
//! it stays as-is.

use super::DiscoveryStrategy;
use crate::discovery::autoconfig::fetch_autoconfig;
use crate::discovery::{ConfigSource, ServerConfig};
use anyhow::Result;
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Resolves MX records and asks the mail provider instead of the domain
pub struct MxProviderLookup {
    resolver: TokioAsyncResolver,
    client: reqwest::Client,
}

impl MxProviderLookup {
    pub fn new(client: reqwest::Client) -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            debug!("System resolver config unavailable ({}), using defaults", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Ok(Self { resolver, client })
    }

    /// Two trailing labels of `host`, e.g. `aspmx.l.google.com` -> `google.com`
    fn provider_domain(host: &str) -> Option<String> {
        let trimmed = host.trim_end_matches('.');
        let labels: Vec<&str> = trimmed.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() < 2 {
            return None;
        }
        Some(labels[labels.len() - 2..].join(".").to_lowercase())
    }

    /// Exchange host of the best (lowest preference value) MX record
    async fn best_mx_exchange(&self, domain: &str) -> Option<String> {
        let lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) => {
                debug!("MX lookup for '{}' failed: {}", domain, e);
                return None;
            }
        };
        lookup
            .iter()
            .min_by_key(|mx| mx.preference())
            .map(|mx| mx.exchange().to_utf8())
    }
}

#[async_trait]
impl DiscoveryStrategy for MxProviderLookup {
    fn name(&self) -> &'static str {
        "mx-provider"
    }

    fn priority(&self) -> u8 {
        ConfigSource::Mx.priority()
    }

    async fn discover(&self, domain: &str, cancel: &CancellationToken) -> Vec<ServerConfig> {
        let Some(exchange) = self.best_mx_exchange(domain).await else {
            return Vec::new();
        };
        let Some(provider) = Self::provider_domain(&exchange) else {
            return Vec::new();
        };
        if provider == domain {
            // The domain hosts its own mail; the other strategies already
            // asked it directly
            return Vec::new();
        }
        debug!("MX of '{}' points at provider '{}'", domain, provider);

        let urls = [
            format!(
                "https://live.thunderbird.net/autoconfig/v1.1/{}",
                provider
            ),
            format!("https://autoconfig.{}/mail/config-v1.1.xml", provider),
            format!(
                "https://{}/.well-known/autoconfig/mail/config-v1.1.xml",
                provider
            ),
        ];

        for url in urls {
            if cancel.is_cancelled() {
                return Vec::new();
            }
            let found = fetch_autoconfig(&self.client, &url).await;
            if !found.is_empty() {
                return found
                    .into_iter()
                    .map(|server| {
                        ServerConfig::new(
                            server.hostname,
                            server.port,
                            server.security,
                            server.username_format,
                            ConfigSource::Mx,
                        )
                    })
                    .collect();
            }
        }
        Vec::new()
    }
}

//! Well-known autoconfig URL lookup
//!
//! Many providers self-host their configuration at predictable locations:
//! `autoconfig.{domain}/mail/config-v1.1.xml` first, then the
//! `/.well-known/autoconfig/` path on the bare domain.

use super::DiscoveryStrategy;
use crate::discovery::autoconfig::fetch_autoconfig;
use crate::discovery::{ConfigSource, ServerConfig};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Probes the provider's own autoconfig endpoints
pub struct WellKnownLookup {
    client: reqwest::Client,
}

impl WellKnownLookup {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn urls(domain: &str) -> [String; 2] {
        [
            format!("https://autoconfig.{}/mail/config-v1.1.xml", domain),
            format!(
                "https://{}/.well-known/autoconfig/mail/config-v1.1.xml",
                domain
            ),
        ]
    }
}

#[async_trait]
impl DiscoveryStrategy for WellKnownLookup {
    fn name(&self) -> &'static str {
        "well-known"
    }

    fn priority(&self) -> u8 {
        ConfigSource::Autoconfig.priority()
    }

    async fn discover(&self, domain: &str, cancel: &CancellationToken) -> Vec<ServerConfig> {
        for url in Self::urls(domain) {
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
                            ConfigSource::Autoconfig,
                        )
                    })
                    .collect();
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_order() {
        let urls = WellKnownLookup::urls("example.com");
        assert_eq!(
            urls[0],
            "https://autoconfig.example.com/mail/config-v1.1.xml"
        );
        assert_eq!(
            urls[1],
            "https://example.com/.well-known/autoconfig/mail/config-v1.1.xml"
        );
    }
}

//! Thunderbird ISPDB directory lookup

use super::DiscoveryStrategy;
use crate::discovery::autoconfig::fetch_autoconfig;
use crate::discovery::{ConfigSource, ServerConfig};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

const ISPDB_BASE: &str = "https://live.thunderbird.net/autoconfig/v1.1";

/// Looks the domain up in the public ISPDB directory
pub struct DirectoryLookup {
    client: reqwest::Client,
}

impl DirectoryLookup {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DiscoveryStrategy for DirectoryLookup {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn priority(&self) -> u8 {
        ConfigSource::Ispdb.priority()
    }

    async fn discover(&self, domain: &str, _cancel: &CancellationToken) -> Vec<ServerConfig> {
        let url = format!("{}/{}", ISPDB_BASE, domain);
        fetch_autoconfig(&self.client, &url)
            .await
            .into_iter()
            .map(|server| {
                ServerConfig::new(
                    server.hostname,
                    server.port,
                    server.security,
                    server.username_format,
                    ConfigSource::Ispdb,
                )
            })
            .collect()
    }
}

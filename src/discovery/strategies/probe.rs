//! Live connection probing
//!
//! Last-resort strategy: attempt plain TCP connects to the conventional
//! IMAP host names on 993 (SSL) and 143 (STARTTLS). A host that accepts
//! and closes a connection becomes a guess-grade candidate carrying the
//! security mode implied by its port.

use super::DiscoveryStrategy;
use crate::constants::discovery::PROBE_TIMEOUT;
use crate::discovery::{ConfigSource, SecurityMode, ServerConfig, UsernameFormat};
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Probes `imap.`, `mail.` and the bare domain on the standard IMAP ports
pub struct ProbeStrategy {
    connect_timeout: Duration,
}

impl Default for ProbeStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeStrategy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connect_timeout: PROBE_TIMEOUT,
        }
    }

    /// Override the per-attempt connect timeout (tests)
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn attempts(domain: &str) -> Vec<(String, u16, SecurityMode)> {
        let hosts = [
            format!("imap.{}", domain),
            format!("mail.{}", domain),
            domain.to_string(),
        ];
        let ports = [(993u16, SecurityMode::Ssl), (143u16, SecurityMode::StartTls)];

        hosts
            .iter()
            .flat_map(|host| {
                ports
                    .iter()
                    .map(move |&(port, security)| (host.clone(), port, security))
            })
            .collect()
    }
}

#[async_trait]
impl DiscoveryStrategy for ProbeStrategy {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn priority(&self) -> u8 {
        ConfigSource::Guess.priority()
    }

    async fn discover(&self, domain: &str, cancel: &CancellationToken) -> Vec<ServerConfig> {
        let mut found = Vec::new();

        for (host, port, security) in Self::attempts(domain) {
            if cancel.is_cancelled() {
                break;
            }

            let connect = tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((host.as_str(), port)),
            );
            match connect.await {
                Ok(Ok(stream)) => {
                    // Connect-and-disconnect is the whole probe
                    drop(stream);
                    debug!("Probe hit {}:{}", host, port);
                    found.push(ServerConfig::new(
                        host.clone(),
                        port,
                        security,
                        UsernameFormat::Email,
                        ConfigSource::Guess,
                    ));
                }
                Ok(Err(e)) => debug!("Probe {}:{} refused: {}", host, port, e),
                Err(_) => debug!("Probe {}:{} timed out", host, port),
            }
        }

        found
    }
}

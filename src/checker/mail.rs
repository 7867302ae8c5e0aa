//! Mail account checker
//!
//! Example [`Checker`] for `email:password` records. It locates the IMAP
//! server for the record's domain through the discovery service, then
//! proves the server reachable (directly or through an HTTP CONNECT
//! tunnel). A reachable server marks the domain verified so later records
//! for the same domain take the registry fast path.
//!
//! Speaking the actual mail protocol is a different checker's job; this one
//! stops at the connect, which is what exercises discovery, proxies and the
//! retry machinery.

use super::{Checker, ProcessOutcome};
use crate::discovery::DiscoveryService;
use crate::error::CheckError;
use crate::proxy::{Proxy, ProxyType};
use async_trait::async_trait;
use base64::Engine as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One parsed `email:password` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRecord {
    pub email: String,
    pub password: String,
    pub domain: String,
}

/// Per-attempt connector; holds the proxy picked for this attempt
pub struct MailClient {
    proxy: Option<Proxy>,
    connect_timeout: Duration,
}

impl MailClient {
    /// Open a TCP connection to `host:port`, tunnelling when a proxy is set
    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, CheckError> {
        match &self.proxy {
            None => {
                let stream = tokio::time::timeout(
                    self.connect_timeout,
                    TcpStream::connect((host, port)),
                )
                .await
                .map_err(|_| CheckError::Timeout {
                    operation: format!("connect to {}:{}", host, port),
                })?
                .map_err(|source| CheckError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                })?;
                Ok(stream)
            }
            Some(proxy) => match proxy.kind {
                ProxyType::Http | ProxyType::Https => {
                    self.connect_via_http(proxy, host, port).await
                }
                ProxyType::Socks4 | ProxyType::Socks5 => Err(CheckError::ProxyTunnel {
                    proxy: proxy.to_string(),
                    reason: "SOCKS tunnelling is not supported by the mail checker".to_string(),
                }),
            },
        }
    }

    async fn connect_via_http(
        &self,
        proxy: &Proxy,
        host: &str,
        port: u16,
    ) -> Result<TcpStream, CheckError> {
        let mut stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((proxy.host.as_str(), proxy.port)),
        )
        .await
        .map_err(|_| CheckError::Timeout {
            operation: format!("connect to proxy {}", proxy),
        })?
        .map_err(|source| CheckError::Connect {
            host: proxy.host.clone(),
            port: proxy.port,
            source,
        })?;

        let mut request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n");
        if let (Some(user), Some(pass)) = (&proxy.username, &proxy.password) {
            let credentials =
                base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            request.push_str(&format!("Proxy-Authorization: Basic {credentials}\r\n"));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        // Read the status line plus headers up to the blank line
        let mut response = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        while !response.ends_with(b"\r\n\r\n") {
            if response.len() > 8192 {
                return Err(CheckError::ProxyTunnel {
                    proxy: proxy.to_string(),
                    reason: "oversized CONNECT response".to_string(),
                });
            }
            let read = tokio::time::timeout_at(deadline, stream.read(&mut byte))
                .await
                .map_err(|_| CheckError::Timeout {
                    operation: format!("CONNECT handshake with {}", proxy),
                })??;
            if read == 0 {
                return Err(CheckError::ProxyTunnel {
                    proxy: proxy.to_string(),
                    reason: "proxy closed the connection mid-handshake".to_string(),
                });
            }
            response.push(byte[0]);
        }

        let status_line = response
            .split(|&b| b == b'\n')
            .next()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .unwrap_or_default();
        if status_line.split_whitespace().nth(1) == Some("200") {
            Ok(stream)
        } else {
            Err(CheckError::ProxyTunnel {
                proxy: proxy.to_string(),
                reason: format!("CONNECT rejected: {}", status_line.trim()),
            })
        }
    }
}

/// Checker that verifies a mail server exists and answers for the record
pub struct MailChecker {
    discovery: Arc<DiscoveryService>,
    connect_timeout: Duration,
}

impl MailChecker {
    #[must_use]
    pub fn new(discovery: Arc<DiscoveryService>) -> Self {
        Self {
            discovery,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Checker for MailChecker {
    type Record = MailRecord;
    type Client = MailClient;

    fn quick_validate(&self, line: &str) -> bool {
        // Cheap shape check without allocating: local@domain before the
        // first colon, something after it
        match line.find(':') {
            Some(colon) if colon + 1 < line.len() => {
                let address = &line[..colon];
                match address.find('@') {
                    Some(at) => at > 0 && at + 1 < address.len(),
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn parse(&self, line: &str) -> Option<MailRecord> {
        let (email, password) = line.split_once(':')?;
        let (local, domain) = email.split_once('@')?;
        if local.is_empty() || domain.is_empty() || password.is_empty() {
            return None;
        }
        if !domain.contains('.') || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(MailRecord {
            email: email.to_string(),
            password: password.to_string(),
            domain: domain.to_lowercase(),
        })
    }

    async fn create_client(&self, proxy: Option<Proxy>) -> Result<MailClient, CheckError> {
        Ok(MailClient {
            proxy,
            connect_timeout: self.connect_timeout,
        })
    }

    async fn process(
        &self,
        record: &MailRecord,
        client: &mut MailClient,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, CheckError> {
        let candidates = self.discovery.get_candidates(&record.domain, cancel).await?;
        if candidates.is_empty() {
            debug!("No server candidates for '{}'", record.domain);
            return Ok(ProcessOutcome::Ignored);
        }

        let mut last_error = None;
        for candidate in &candidates {
            if cancel.is_cancelled() {
                return Err(CheckError::Cancelled);
            }
            match client.connect(&candidate.hostname, candidate.port).await {
                Ok(stream) => {
                    drop(stream);
                    self.discovery.mark_verified(&record.domain, candidate).await;
                    return Ok(ProcessOutcome::Success(vec![
                        (
                            "server".to_string(),
                            format!("{}:{}", candidate.hostname, candidate.port),
                        ),
                        ("security".to_string(), candidate.security.as_str().to_string()),
                    ]));
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    debug!("Candidate {} unreachable: {}", candidate, e);
                    last_error = Some(e);
                }
            }
        }

        // Every candidate failed to answer; worth another attempt later
        Ok(ProcessOutcome::Retry(last_error.map(|e| e.to_string())))
    }
}

//! Proxy list parsing and rotation
//!
//! Proxy files carry one proxy per line in any of the accepted forms:
//!
//! - `host:port`
//! - `host:port:user:pass`
//! - `user:pass@host:port`
//! - any of the above prefixed with `http://`, `https://`, `socks4://` or
//!   `socks5://`
//!
//! Lines without a scheme take the configured default type. Blank lines are
//! skipped; unparseable lines are collected for diagnostics instead of
//! aborting the load.

use crate::rotation::RoundRobin;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Proxy protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProxyType {
    #[default]
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyType {
    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks4" => Some(Self::Socks4),
            "socks5" => Some(Self::Socks5),
            _ => None,
        }
    }
}

/// A single upstream proxy endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub kind: ProxyType,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Result of parsing a proxy file
#[derive(Debug, Default)]
pub struct ProxyList {
    pub proxies: Vec<Proxy>,
    /// Lines that did not match any accepted form, for diagnostics
    pub failed: Vec<String>,
}

/// Parse proxy file contents
///
/// Never fails: every line either yields a proxy or lands in `failed`.
#[must_use]
pub fn parse_proxy_list(contents: &str, default_type: ProxyType) -> ProxyList {
    let mut list = ProxyList::default();

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match parse_proxy_line(line, default_type) {
            Some(proxy) => list.proxies.push(proxy),
            None => list.failed.push(line.to_string()),
        }
    }

    if !list.failed.is_empty() {
        warn!(
            "Skipped {} unparseable proxy line(s) out of {}",
            list.failed.len(),
            list.proxies.len() + list.failed.len()
        );
    }

    list
}

fn parse_proxy_line(line: &str, default_type: ProxyType) -> Option<Proxy> {
    // Optional scheme prefix overrides the default type
    let (kind, rest) = match line.split_once("://") {
        Some((scheme, rest)) => (ProxyType::from_scheme(scheme)?, rest),
        None => (default_type, line),
    };

    // user:pass@host:port
    if let Some((creds, endpoint)) = rest.rsplit_once('@') {
        let (user, pass) = creds.split_once(':')?;
        let (host, port) = parse_endpoint(endpoint)?;
        return Some(Proxy {
            kind,
            host,
            port,
            username: Some(user.to_string()),
            password: Some(pass.to_string()),
        });
    }

    // host:port or host:port:user:pass
    let mut parts = rest.split(':');
    let host = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    if host.is_empty() {
        return None;
    }

    let (username, password) = match (parts.next(), parts.next()) {
        (Some(user), Some(pass)) => (Some(user.to_string()), Some(pass.to_string())),
        (None, _) => (None, None),
        // Trailing user without a password is malformed
        (Some(_), None) => return None,
    };
    if parts.next().is_some() {
        return None;
    }

    Some(Proxy {
        kind,
        host,
        port,
        username,
        password,
    })
}

fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

/// Rotating dispenser over a (possibly empty) proxy list
///
/// The inner rotator is only constructed when proxies exist, so an empty
/// list yields `None` from every `next()` rather than a construction error.
#[derive(Debug, Clone, Default)]
pub struct ProxyRotator {
    inner: Option<Arc<RoundRobin<Proxy>>>,
}

impl ProxyRotator {
    #[must_use]
    pub fn new(proxies: Vec<Proxy>) -> Self {
        let inner = if proxies.is_empty() {
            None
        } else {
            // new() only fails on an empty set, which is excluded here
            RoundRobin::new(proxies).ok().map(Arc::new)
        };
        Self { inner }
    }

    /// Next proxy in rotation, or `None` when no proxies are configured
    #[must_use]
    pub fn next(&self) -> Option<&Proxy> {
        self.inner.as_deref().map(RoundRobin::next)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.as_deref().map_or(0, RoundRobin::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let list = parse_proxy_list("10.0.0.1:8080", ProxyType::Http);
        assert_eq!(list.proxies.len(), 1);
        assert!(list.failed.is_empty());

        let proxy = &list.proxies[0];
        assert_eq!(proxy.host, "10.0.0.1");
        assert_eq!(proxy.port, 8080);
        assert_eq!(proxy.kind, ProxyType::Http);
        assert!(proxy.username.is_none());
    }

    #[test]
    fn test_parse_host_port_user_pass() {
        let list = parse_proxy_list("proxy.example.com:3128:alice:s3cret", ProxyType::Http);
        let proxy = &list.proxies[0];
        assert_eq!(proxy.host, "proxy.example.com");
        assert_eq!(proxy.port, 3128);
        assert_eq!(proxy.username.as_deref(), Some("alice"));
        assert_eq!(proxy.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_parse_user_pass_at_host_port() {
        let list = parse_proxy_list("bob:pw@proxy.example.com:1080", ProxyType::Socks5);
        let proxy = &list.proxies[0];
        assert_eq!(proxy.host, "proxy.example.com");
        assert_eq!(proxy.port, 1080);
        assert_eq!(proxy.username.as_deref(), Some("bob"));
        assert_eq!(proxy.password.as_deref(), Some("pw"));
        assert_eq!(proxy.kind, ProxyType::Socks5);
    }

    #[test]
    fn test_scheme_prefix_overrides_default() {
        let list = parse_proxy_list("socks5://10.0.0.2:1080", ProxyType::Http);
        assert_eq!(list.proxies[0].kind, ProxyType::Socks5);

        let list = parse_proxy_list("https://secure.example.com:443", ProxyType::Socks4);
        assert_eq!(list.proxies[0].kind, ProxyType::Https);
    }

    #[test]
    fn test_scheme_with_credentials() {
        let list = parse_proxy_list("http://u:p@10.0.0.3:8080", ProxyType::Socks5);
        let proxy = &list.proxies[0];
        assert_eq!(proxy.kind, ProxyType::Http);
        assert_eq!(proxy.username.as_deref(), Some("u"));
        assert_eq!(proxy.port, 8080);
    }

    #[test]
    fn test_blank_lines_ignored_failures_collected() {
        let contents = "10.0.0.1:8080\n\n   \nnot-a-proxy\nftp://x:1/\nhost:notaport\n";
        let list = parse_proxy_list(contents, ProxyType::Http);
        assert_eq!(list.proxies.len(), 1);
        assert_eq!(list.failed.len(), 3);
        assert!(list.failed.contains(&"not-a-proxy".to_string()));
    }

    #[test]
    fn test_rotator_empty_returns_none() {
        let rotator = ProxyRotator::new(vec![]);
        assert!(rotator.next().is_none());
        assert!(rotator.is_empty());
        assert_eq!(rotator.len(), 0);
    }

    #[test]
    fn test_rotator_cycles() {
        let list = parse_proxy_list("a:1\nb:2\n", ProxyType::Http);
        let rotator = ProxyRotator::new(list.proxies);
        assert_eq!(rotator.len(), 2);

        let hosts: Vec<String> = (0..4)
            .map(|_| rotator.next().unwrap().host.clone())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "a", "b"]);
    }
}

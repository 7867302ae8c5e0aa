//! Error types for check attempts
//!
//! This module provides the error type checkers raise from `create_client`
//! and `process`, with enough structure for the engine to separate transient
//! network trouble from terminal rejections.

use std::fmt;

/// Errors that can occur during a single check attempt
#[derive(Debug)]
pub enum CheckError {
    /// TCP connection failed
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// Operation exceeded its deadline
    Timeout { operation: String },

    /// Proxy tunnel could not be established
    ProxyTunnel { proxy: String, reason: String },

    /// Remote side rejected the credentials or request
    Rejected { reason: String },

    /// No server could be located for the record
    NoServer { domain: String },

    /// The run was cancelled while the attempt was in flight
    Cancelled,

    /// I/O error during communication
    Io(std::io::Error),
}

impl CheckError {
    /// Whether this error represents cancellation rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Default transience classification
    ///
    /// Checkers may override via `Checker::is_transient`; this covers the
    /// common cases: connect failures, timeouts and raw I/O are worth a
    /// retry, rejections and missing servers are not.
    #[must_use]
    pub fn is_transient_default(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } | Self::Io(_) => true,
            Self::ProxyTunnel { .. } => true,
            Self::Rejected { .. } | Self::NoServer { .. } | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { host, port, source } => {
                write!(f, "Failed to connect to {}:{}: {}", host, port, source)
            }
            Self::Timeout { operation } => write!(f, "Timed out during {}", operation),
            Self::ProxyTunnel { proxy, reason } => {
                write!(f, "Proxy tunnel through {} failed: {}", proxy, reason)
            }
            Self::Rejected { reason } => write!(f, "Rejected: {}", reason),
            Self::NoServer { domain } => write!(f, "No server found for domain '{}'", domain),
            Self::Cancelled => write!(f, "Attempt cancelled"),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

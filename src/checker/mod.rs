//! Checker contract
//!
//! The engine is generic over a [`Checker`]: the business logic that knows
//! how to validate, parse and process one record. The engine never inspects
//! record or client internals; it only drives the retry/classification loop
//! and routes outcomes to the result writer.

use crate::error::CheckError;
use crate::proxy::Proxy;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod mail;

/// Named key/value extracted from a successful check
pub type Capture = (String, String);

/// Outcome of a single processing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Terminal: record passed, with any extracted captures
    Success(Vec<Capture>),
    /// Terminal: record was processed and rejected
    Failed,
    /// Terminal: record is inapplicable (nothing to check against)
    Ignored,
    /// Transient: try again, up to the configured retry budget
    Retry(Option<String>),
}

/// Classification of an entry routed to the output files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Success,
    Failed,
    Ignored,
}

/// One line destined for an output sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEntry {
    pub kind: OutputKind,
    /// The original input line, verbatim
    pub line: String,
    pub captures: Vec<Capture>,
}

impl OutputEntry {
    #[must_use]
    pub fn new(kind: OutputKind, line: String, captures: Vec<Capture>) -> Self {
        Self {
            kind,
            line,
            captures,
        }
    }
}

/// Business logic plugged into the engine
///
/// One client is created per attempt and dropped when the attempt ends, so
/// retries never carry over broken connection state.
#[async_trait]
pub trait Checker: Send + Sync + 'static {
    /// Parsed form of one input line
    type Record: Send + Sync;
    /// Per-attempt scoped resource (connection, session, ...)
    type Client: Send;

    /// Allocation-free prefilter; lines failing this are counted as ignored
    /// and never written anywhere
    fn quick_validate(&self, line: &str) -> bool;

    /// Parse one line; `None` means unparseable
    fn parse(&self, line: &str) -> Option<Self::Record>;

    /// Create the scoped client for one attempt
    async fn create_client(&self, proxy: Option<Proxy>) -> Result<Self::Client, CheckError>;

    /// Process one record through the client
    async fn process(
        &self,
        record: &Self::Record,
        client: &mut Self::Client,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome, CheckError>;

    /// Decide whether a thrown error is worth a retry
    fn is_transient(&self, error: &CheckError) -> bool {
        error.is_transient_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_entry_new() {
        let entry = OutputEntry::new(
            OutputKind::Success,
            "user@example.com:hunter2".to_string(),
            vec![("plan".to_string(), "premium".to_string())],
        );
        assert_eq!(entry.kind, OutputKind::Success);
        assert_eq!(entry.captures.len(), 1);
    }

    #[test]
    fn test_outcome_equality() {
        assert_eq!(ProcessOutcome::Failed, ProcessOutcome::Failed);
        assert_ne!(
            ProcessOutcome::Retry(None),
            ProcessOutcome::Retry(Some("timeout".to_string()))
        );
    }
}

//! Discovery strategies
//!
//! Each strategy is an independent, side-effect-free probe implementing
//! [`DiscoveryStrategy`]. Strategies are resilient: any internal failure
//! degrades to an empty result, never an error. The service layer adds the
//! per-strategy timeout and cancellation handling.

use super::ServerConfig;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

mod directory;
mod mx;
mod probe;
mod well_known;

pub use directory::DirectoryLookup;
pub use mx::MxProviderLookup;
pub use probe::ProbeStrategy;
pub use well_known::WellKnownLookup;

/// One independent way of locating servers for a domain
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Stable identifier for logs
    fn name(&self) -> &'static str;

    /// Authority rank; lower runs earlier and wins deduplication
    fn priority(&self) -> u8;

    /// Probe `domain`; failures return an empty list
    async fn discover(&self, domain: &str, cancel: &CancellationToken) -> Vec<ServerConfig>;
}

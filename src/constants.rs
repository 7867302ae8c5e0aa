//! Constants used throughout the checker engine
//!
//! This module centralizes magic numbers and configuration values
//! to improve maintainability and reduce duplication.

use std::time::Duration;

/// Pipeline channel constants
pub mod channel {
    /// Capacity of the bounded line queue between reader and workers
    pub const INPUT_CAPACITY: usize = 10_000;
}

/// Reader constants
pub mod reader {
    /// Target read buffer size for sequential input streaming
    pub const SEGMENT_SIZE: usize = 1024 * 1024; // 1MB

    /// UTF-8 byte order mark, stripped once at the start of input
    pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
}

/// Result writer constants
pub mod writer {
    use super::Duration;

    /// Pending entries across all sinks before a forced flush
    pub const MAX_BATCH_SIZE: usize = 1_000;

    /// Maximum time an un-flushed entry may sit in a sink buffer
    pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
}

/// Discovery subsystem constants
pub mod discovery {
    use super::Duration;

    /// Per-strategy wall-clock budget
    pub const STRATEGY_TIMEOUT: Duration = Duration::from_secs(10);

    /// Per-attempt connect budget in the probing strategy
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long discovered candidates stay valid in the registry
    pub const CANDIDATE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    /// How long a verified config stays on the fast path
    pub const VERIFIED_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
}

/// Settings and registry file locations under the user's home directory
pub mod paths {
    /// Application directory name under `$HOME`
    pub const APP_DIR: &str = ".checkerbase";

    /// Settings file name
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Registry database file name
    pub const REGISTRY_FILE: &str = "server_registry.db";
}

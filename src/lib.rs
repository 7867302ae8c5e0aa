//! # Checkerbase
//!
//! A high-throughput batch processor for line-oriented text input. Each
//! line is a record (for example a credential tuple); a pool of workers
//! validates, parses and processes records through a pluggable checker,
//! optionally routing network traffic through rotating proxies, and streams
//! classified outcomes into per-kind output files.
//!
//! ## Architecture
//!
//! The crate is organized into topic modules around a bounded streaming
//! pipeline:
//!
//! - **reader**: streams the input file into a bounded line queue
//! - **engine**: worker pool, retry/classification loop, lifecycle control
//! - **writer**: single-consumer fan-out to the output files
//! - **metrics**: lock-free counters driving progress, CPM and ETA
//! - **checker**: the pluggable business-logic contract plus an example
//!   mail-server checker
//! - **discovery**: mail-server discovery with single-flight coalescing and
//!   a durable two-table registry cache
//! - **checkpoint** / **settings**: resume-by-byte-offset across process
//!   restarts, persisted next to the JSON settings
//!
//! ## Design notes
//!
//! Backpressure lives entirely in the bounded line queue: the reader stalls
//! when workers fall behind, and the byte-progress callback only ever
//! reports input that was fully handed downstream, which is what makes the
//! saved resume offsets trustworthy. Output ordering is deliberately
//! unspecified; parallel workers interleave freely.

pub mod checker;
pub mod checkpoint;
pub mod constants;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod reader;
pub mod rotation;
pub mod settings;
pub mod tui;
pub mod writer;

pub use checker::{Capture, Checker, OutputEntry, OutputKind, ProcessOutcome};
pub use checkpoint::CheckpointManager;
pub use engine::{CheckerEngine, EngineConfig, EngineController, EngineState};
pub use error::CheckError;
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use proxy::{Proxy, ProxyRotator, ProxyType};
pub use settings::AppSettings;

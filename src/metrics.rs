//! Lock-free run metrics
//!
//! A single `RunMetrics` instance is shared by the reader (byte progress)
//! and the workers (outcome counters). Snapshots are point-in-time reads;
//! individual fields are consistent but the set as a whole may be skewed by
//! a few counts while workers are mid-update.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pausable elapsed-time clock
///
/// Elapsed time accumulates only while running, so pause windows are
/// excluded from throughput math.
#[derive(Debug, Default)]
struct Stopwatch {
    accumulated: Duration,
    started_at: Option<Instant>,
}

impl Stopwatch {
    fn start(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(started) = self.started_at.take() {
            self.accumulated += started.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started) => self.accumulated + started.elapsed(),
            None => self.accumulated,
        }
    }
}

/// Thread-safe counters for a single run
#[derive(Debug, Default)]
pub struct RunMetrics {
    total_bytes: AtomicU64,
    processed_bytes: AtomicU64,
    success: AtomicU64,
    failed: AtomicU64,
    ignored: AtomicU64,
    retries: AtomicU64,
    clock: Mutex<Stopwatch>,
}

impl RunMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the input file length; drives progress and ETA
    pub fn set_total_bytes(&self, total: u64) {
        self.total_bytes.store(total, Ordering::Release);
    }

    /// Start (or restart after pause) the run clock
    pub fn start(&self) {
        self.clock.lock().unwrap().start();
    }

    /// Stop the run clock
    pub fn stop(&self) {
        self.clock.lock().unwrap().stop();
    }

    /// Pause the clock; counters keep accepting updates from in-flight work
    pub fn pause(&self) {
        self.stop();
    }

    /// Resume the clock after a pause
    pub fn resume(&self) {
        self.start();
    }

    #[inline]
    pub fn add_processed_bytes(&self, delta: u64) {
        self.processed_bytes.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ignored(&self) {
        self.ignored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn processed_bytes(&self) -> u64 {
        self.processed_bytes.load(Ordering::Acquire)
    }

    /// Create a snapshot of current metrics with derived rates
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_bytes = self.total_bytes.load(Ordering::Acquire);
        let processed_bytes = self.processed_bytes.load(Ordering::Acquire);
        let success = self.success.load(Ordering::Acquire);
        let failed = self.failed.load(Ordering::Acquire);
        let ignored = self.ignored.load(Ordering::Acquire);
        let retries = self.retries.load(Ordering::Acquire);
        let elapsed = self.clock.lock().unwrap().elapsed();

        let processed_lines = success + failed + ignored;
        let secs = elapsed.as_secs_f64();

        let progress_percent = if total_bytes > 0 {
            processed_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };

        let bytes_per_sec = if secs > 0.0 {
            processed_bytes as f64 / secs
        } else {
            0.0
        };

        let eta = if bytes_per_sec > 0.0 && total_bytes > processed_bytes {
            let remaining = (total_bytes - processed_bytes) as f64 / bytes_per_sec;
            Some(Duration::from_secs_f64(remaining))
        } else {
            None
        };

        let cpm = if secs > 0.0 {
            processed_lines as f64 / (secs / 60.0)
        } else {
            0.0
        };

        MetricsSnapshot {
            total_bytes,
            processed_bytes,
            processed_lines,
            success,
            failed,
            ignored,
            retries,
            elapsed,
            progress_percent,
            cpm,
            bytes_per_sec,
            eta,
        }
    }
}

/// Immutable snapshot of run progress (for display/reporting)
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub total_bytes: u64,
    pub processed_bytes: u64,
    /// Lines with a terminal outcome; retries are attempts, not lines
    pub processed_lines: u64,
    pub success: u64,
    pub failed: u64,
    pub ignored: u64,
    pub retries: u64,
    pub elapsed: Duration,
    pub progress_percent: f64,
    /// Checks per minute
    pub cpm: f64,
    pub bytes_per_sec: f64,
    pub eta: Option<Duration>,
}

impl MetricsSnapshot {
    /// Format elapsed time as a human-readable string
    #[must_use]
    pub fn format_elapsed(&self) -> String {
        format_duration(self.elapsed)
    }

    /// Format ETA, or "--" when no forward progress has been made
    #[must_use]
    pub fn format_eta(&self) -> String {
        self.eta.map_or_else(|| "--".to_string(), format_duration)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

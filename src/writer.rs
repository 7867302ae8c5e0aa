//! Result writer - single-consumer fan-out to the output files
//!
//! Receives classified [`OutputEntry`] values from the workers and appends
//! them to up to three output files (success, failed, ignored). Entries for
//! an unconfigured sink are dropped and counted.
//!
//! # Flushing
//!
//! Durability is best-effort: the consumer loop selects on the next entry
//! and a periodic tick, flushing when either the pending-write count reaches
//! the batch threshold or the interval elapses with un-flushed state. The
//! tick keeps an entry written just before an idle period from sitting in a
//! buffer indefinitely. Remaining entries are flushed on loop exit.

use crate::checker::{Capture, OutputEntry, OutputKind};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Renders the output line for an entry; receives the original line and the
/// captures extracted by the checker
pub type LineFormatter = Arc<dyn Fn(&str, &[Capture]) -> String + Send + Sync>;

/// Destinations and flush policy for one run
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub success_path: Option<PathBuf>,
    pub failed_path: Option<PathBuf>,
    pub ignored_path: Option<PathBuf>,
    /// Append to existing files instead of truncating on first write
    pub append_to_existing: bool,
    pub max_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            success_path: None,
            failed_path: None,
            ignored_path: None,
            append_to_existing: true,
            max_batch_size: crate::constants::writer::MAX_BATCH_SIZE,
            flush_interval: crate::constants::writer::FLUSH_INTERVAL,
        }
    }
}

impl WriterConfig {
    fn path_for(&self, kind: OutputKind) -> Option<&PathBuf> {
        match kind {
            OutputKind::Success => self.success_path.as_ref(),
            OutputKind::Failed => self.failed_path.as_ref(),
            OutputKind::Ignored => self.ignored_path.as_ref(),
        }
    }
}

/// Atomically-readable writer counters
#[derive(Debug, Default)]
pub struct WriterStats {
    entries_written: AtomicU64,
    flush_count: AtomicU64,
    dropped_entries: AtomicU64,
}

impl WriterStats {
    #[must_use]
    pub fn total_entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn dropped_entry_count(&self) -> u64 {
        self.dropped_entries.load(Ordering::Acquire)
    }
}

/// One lazily-opened output file
struct Sink {
    kind: OutputKind,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl Sink {
    async fn write_line(&mut self, body: &str, append: bool) -> Result<()> {
        if self.writer.is_none() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await.with_context(|| {
                        format!("Failed to create output directory {}", parent.display())
                    })?;
                }
            }
            let file = OpenOptions::new()
                .create(true)
                .append(append)
                .write(true)
                .truncate(!append)
                .open(&self.path)
                .await
                .with_context(|| format!("Failed to open output file {}", self.path.display()))?;
            debug!(
                "Opened {:?} sink at {} ({})",
                self.kind,
                self.path.display(),
                if append { "append" } else { "truncate" }
            );
            self.writer = Some(BufWriter::new(file));
        }

        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(body.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}

/// Single-consumer writer task over the unbounded output queue
pub struct ResultWriter {
    config: WriterConfig,
    formatter: Option<LineFormatter>,
    stats: Arc<WriterStats>,
    sinks: Vec<Sink>,
    pending: usize,
}

impl ResultWriter {
    #[must_use]
    pub fn new(config: WriterConfig, formatter: Option<LineFormatter>) -> Self {
        let sinks = [OutputKind::Success, OutputKind::Failed, OutputKind::Ignored]
            .into_iter()
            .filter_map(|kind| {
                config.path_for(kind).map(|path| Sink {
                    kind,
                    path: path.clone(),
                    writer: None,
                })
            })
            .collect();

        Self {
            config,
            formatter,
            stats: Arc::new(WriterStats::default()),
            sinks,
            pending: 0,
        }
    }

    /// Counters handle; stays valid after the writer task finishes
    #[must_use]
    pub fn stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.stats)
    }

    /// Consume entries until the queue closes or the run is cancelled
    ///
    /// On cancellation pending writes are flushed but no further entries are
    /// accepted. On normal close the queue drains fully first.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<OutputEntry>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                entry = rx.recv() => match entry {
                    Some(entry) => {
                        self.write_entry(entry).await?;
                        if self.pending >= self.config.max_batch_size {
                            self.flush_all().await?;
                        }
                    }
                    None => break,
                },
                _ = interval.tick() => {
                    if self.pending > 0 {
                        self.flush_all().await?;
                    }
                }
                _ = cancel.cancelled() => {
                    debug!("Writer cancelled; flushing pending entries");
                    break;
                }
            }
        }

        if self.pending > 0 {
            self.flush_all().await?;
        }
        self.shutdown().await
    }

    async fn write_entry(&mut self, entry: OutputEntry) -> Result<()> {
        let Some(sink) = self.sinks.iter_mut().find(|s| s.kind == entry.kind) else {
            self.stats.dropped_entries.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        let body = match &self.formatter {
            Some(format) => format(&entry.line, &entry.captures),
            None => entry.line.clone(),
        };
        sink.write_line(&body, self.config.append_to_existing)
            .await?;

        self.pending += 1;
        self.stats.entries_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush_all(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush().await?;
        }
        self.pending = 0;
        self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close all sinks, collecting disposal errors into one failure
    async fn shutdown(mut self) -> Result<()> {
        let mut errors = Vec::new();
        for sink in &mut self.sinks {
            if let Some(writer) = sink.writer.as_mut() {
                if let Err(e) = writer.shutdown().await {
                    warn!("Failed to close {:?} sink: {}", sink.kind, e);
                    errors.push(format!("{:?}: {}", sink.kind, e));
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Failed to close output sink(s): {}", errors.join("; "))
        }
    }
}

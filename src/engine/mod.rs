//! Checker engine - pipeline orchestration
//!
//! Wires one reader task, `parallelism` worker tasks and one writer task
//! around a bounded line queue and an unbounded output queue, then enforces
//! the shutdown ordering that keeps partial failures from hanging the run:
//!
//! 1. await the reader (cancelling the run first if it failed)
//! 2. the line queue closes with the reader in all cases
//! 3. await the workers (cancelling the run on the first failure)
//! 4. the output queue closes once every worker is done
//! 5. await the writer
//! 6. stop the clock
//!
//! Engines are single-use: construct, `run` once, discard.

use crate::checker::{Checker, OutputEntry, OutputKind, ProcessOutcome};
use crate::constants::channel::INPUT_CAPACITY;
use crate::metrics::RunMetrics;
use crate::proxy::ProxyRotator;
use crate::reader::LineReader;
use crate::writer::{LineFormatter, ResultWriter, WriterConfig, WriterStats};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

mod controller;
mod pause;

pub use controller::{EngineController, EngineState, StateEvent, ValidationError};
pub use pause::PauseGate;

/// Tunables for one run
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent worker tasks
    pub parallelism: usize,
    /// Retry budget per record
    pub max_retries: u32,
    /// Capacity of the bounded line queue
    pub input_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_retries: 2,
            input_channel_capacity: INPUT_CAPACITY,
        }
    }
}

/// One single-use pipeline run over an input file
pub struct CheckerEngine<C: Checker> {
    checker: Arc<C>,
    proxies: ProxyRotator,
    metrics: Arc<RunMetrics>,
    config: EngineConfig,
    cancel: CancellationToken,
    pause: PauseGate,
    writer: Mutex<Option<ResultWriter>>,
    writer_stats: Arc<WriterStats>,
}

impl<C: Checker> CheckerEngine<C> {
    pub fn new(
        checker: Arc<C>,
        proxies: ProxyRotator,
        writer_config: WriterConfig,
        formatter: Option<LineFormatter>,
        config: EngineConfig,
    ) -> Self {
        let writer = ResultWriter::new(writer_config, formatter);
        let writer_stats = writer.stats();
        Self {
            checker,
            proxies,
            metrics: Arc::new(RunMetrics::new()),
            config,
            cancel: CancellationToken::new(),
            pause: PauseGate::new(),
            writer: Mutex::new(Some(writer)),
            writer_stats,
        }
    }

    /// Shared metrics handle for progress reporting
    #[must_use]
    pub fn metrics(&self) -> Arc<RunMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Writer counters (entries written, flushes, drops)
    #[must_use]
    pub fn writer_stats(&self) -> Arc<WriterStats> {
        Arc::clone(&self.writer_stats)
    }

    /// Request cancellation; tasks drain and the run returns cleanly
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop pulling new records; in-flight records run to completion
    pub fn pause(&self) {
        self.pause.pause();
        self.metrics.pause();
    }

    /// Resume after [`pause`](Self::pause)
    pub fn resume(&self) {
        self.metrics.resume();
        self.pause.resume();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Run the pipeline over `input_path` to completion or cancellation
    pub async fn run(&self, input_path: &Path) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .unwrap()
            .take()
            .context("Engine instances are single-use; this one already ran")?;

        let file_len = tokio::fs::metadata(input_path)
            .await
            .with_context(|| format!("Failed to stat input file {}", input_path.display()))?
            .len();
        self.metrics.set_total_bytes(file_len);
        self.metrics.start();
        info!(
            "Starting run over {} ({} bytes, {} workers, {} retries)",
            input_path.display(),
            file_len,
            self.config.parallelism,
            self.config.max_retries
        );

        let (line_tx, line_rx) = mpsc::channel::<String>(self.config.input_channel_capacity);
        // Workers share one receiver behind an async mutex; the queue stays
        // single-producer multi-consumer without an extra crate
        let line_rx = Arc::new(tokio::sync::Mutex::new(line_rx));
        let (out_tx, out_rx) = mpsc::unbounded_channel::<OutputEntry>();

        let reader_handle = {
            let metrics = Arc::clone(&self.metrics);
            let cancel = self.cancel.clone();
            let path = input_path.to_path_buf();
            tokio::spawn(async move {
                // The task owns line_tx; dropping it on any exit closes the
                // queue and lets the workers drain out
                LineReader::new()
                    .run(&path, line_tx, cancel, move |delta| {
                        metrics.add_processed_bytes(delta);
                    })
                    .await
            })
        };

        let worker_handles: Vec<_> = (0..self.config.parallelism.max(1))
            .map(|id| {
                tokio::spawn(run_worker(WorkerContext {
                    id,
                    checker: Arc::clone(&self.checker),
                    line_rx: Arc::clone(&line_rx),
                    out_tx: out_tx.clone(),
                    proxies: self.proxies.clone(),
                    metrics: Arc::clone(&self.metrics),
                    max_retries: self.config.max_retries,
                    pause: self.pause.clone(),
                    cancel: self.cancel.clone(),
                }))
            })
            .collect();
        // Only worker clones remain; the output queue closes when they finish
        drop(out_tx);

        let writer_handle = {
            let cancel = self.cancel.clone();
            tokio::spawn(writer.run(out_rx, cancel))
        };

        // Shutdown ordering starts here
        let mut first_error: Option<anyhow::Error> = None;

        match reader_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Reader failed: {}", e);
                self.cancel.cancel();
                first_error = Some(anyhow::Error::new(e).context("Input reader failed"));
            }
            Err(join) => {
                self.cancel.cancel();
                first_error = Some(anyhow::anyhow!("Reader task panicked: {}", join));
            }
        }

        for handle in worker_handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Worker failed: {}", e);
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join) => {
                    self.cancel.cancel();
                    if first_error.is_none() {
                        first_error = Some(anyhow::anyhow!("Worker task panicked: {}", join));
                    }
                }
            }
        }

        match writer_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Writer failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e.context("Result writer failed"));
                }
            }
            Err(join) => {
                if first_error.is_none() {
                    first_error = Some(anyhow::anyhow!("Writer task panicked: {}", join));
                }
            }
        }

        self.metrics.stop();

        match first_error {
            None => {
                let snap = self.metrics.snapshot();
                info!(
                    "Run finished: {} ok, {} failed, {} ignored, {} retries",
                    snap.success, snap.failed, snap.ignored, snap.retries
                );
                Ok(())
            }
            Some(e) => Err(e),
        }
    }
}

/// Everything one worker task needs
struct WorkerContext<C: Checker> {
    id: usize,
    checker: Arc<C>,
    line_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    out_tx: mpsc::UnboundedSender<OutputEntry>,
    proxies: ProxyRotator,
    metrics: Arc<RunMetrics>,
    max_retries: u32,
    pause: PauseGate,
    cancel: CancellationToken,
}

/// Per-record retry/classification loop
///
/// A cancelled worker returns `Ok(())` without emitting; real failures
/// (a closed output queue mid-run) bubble up so the engine cancels the rest.
async fn run_worker<C: Checker>(ctx: WorkerContext<C>) -> Result<()> {
    loop {
        // Hold new records back while paused; cancellation wins over both
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            _ = ctx.pause.wait_open() => {}
        }

        let line = {
            let mut rx = ctx.line_rx.lock().await;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                line = rx.recv() => line,
            }
        };
        let Some(line) = line else {
            debug!("Worker {} draining: line queue closed", ctx.id);
            return Ok(());
        };

        if !ctx.checker.quick_validate(&line) {
            // Prefilter rejects are never written anywhere
            ctx.metrics.record_ignored();
            continue;
        }

        let Some(record) = ctx.checker.parse(&line) else {
            ctx.metrics.record_ignored();
            let entry = OutputEntry::new(OutputKind::Ignored, line, vec![]);
            if let Err(e) = emit(&ctx.out_tx, entry) {
                if ctx.cancel.is_cancelled() {
                    // Writer already wound down; the entry is dropped by design
                    return Ok(());
                }
                ctx.cancel.cancel();
                return Err(e);
            }
            continue;
        };

        match check_record(&ctx, &record, &line).await {
            Ok(RecordEnd::Terminal) => {}
            // Cancellation observed mid-record; exit silently
            Ok(RecordEnd::Cancelled) => return Ok(()),
            Err(e) => {
                if ctx.cancel.is_cancelled() {
                    // A closed output queue after cancellation is the normal
                    // wind-down, not a pipeline failure
                    return Ok(());
                }
                // The output queue is gone; cancel so the reader unblocks
                // instead of stalling against a full line queue
                ctx.cancel.cancel();
                return Err(e);
            }
        }
    }
}

enum RecordEnd {
    Terminal,
    Cancelled,
}

/// Drive one record through retries to a terminal outcome
///
/// Errors mean the pipeline itself broke (output queue gone), not that the
/// record failed; record failures are counted and emitted, never returned.
async fn check_record<C: Checker>(
    ctx: &WorkerContext<C>,
    record: &C::Record,
    line: &str,
) -> Result<RecordEnd> {
    let mut retry_count: u32 = 0;

    loop {
        let proxy = ctx.proxies.next().cloned();

        // One scoped client per attempt; dropped on every exit path below
        // so retries never reuse broken connection state
        let mut client = match ctx.checker.create_client(proxy).await {
            Ok(client) => client,
            Err(e) if e.is_cancelled() || ctx.cancel.is_cancelled() => {
                return Ok(RecordEnd::Cancelled);
            }
            Err(e) => {
                if ctx.checker.is_transient(&e) && retry_count < ctx.max_retries {
                    ctx.metrics.record_retry();
                    retry_count += 1;
                    continue;
                }
                debug!("Client creation failed terminally: {}", e);
                ctx.metrics.record_failed();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Failed, line.to_string(), vec![]),
                )?;
                return Ok(RecordEnd::Terminal);
            }
        };

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(RecordEnd::Cancelled),
            result = ctx.checker.process(record, &mut client, &ctx.cancel) => result,
        };
        drop(client);

        match result {
            Err(e) if e.is_cancelled() => return Ok(RecordEnd::Cancelled),
            Err(e) => {
                if ctx.checker.is_transient(&e) && retry_count < ctx.max_retries {
                    debug!("Transient error, retry {}: {}", retry_count + 1, e);
                    ctx.metrics.record_retry();
                    retry_count += 1;
                    continue;
                }
                ctx.metrics.record_failed();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Failed, line.to_string(), vec![]),
                )?;
                return Ok(RecordEnd::Terminal);
            }
            Ok(ProcessOutcome::Success(captures)) => {
                ctx.metrics.record_success();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Success, line.to_string(), captures),
                )?;
                return Ok(RecordEnd::Terminal);
            }
            Ok(ProcessOutcome::Failed) => {
                ctx.metrics.record_failed();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Failed, line.to_string(), vec![]),
                )?;
                return Ok(RecordEnd::Terminal);
            }
            Ok(ProcessOutcome::Ignored) => {
                ctx.metrics.record_ignored();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Ignored, line.to_string(), vec![]),
                )?;
                return Ok(RecordEnd::Terminal);
            }
            Ok(ProcessOutcome::Retry(cause)) => {
                if retry_count < ctx.max_retries {
                    debug!(
                        "Retry {} requested{}",
                        retry_count + 1,
                        cause.map(|c| format!(": {}", c)).unwrap_or_default()
                    );
                    ctx.metrics.record_retry();
                    retry_count += 1;
                    continue;
                }
                ctx.metrics.record_failed();
                emit(
                    &ctx.out_tx,
                    OutputEntry::new(OutputKind::Failed, line.to_string(), vec![]),
                )?;
                return Ok(RecordEnd::Terminal);
            }
        }
    }
}

fn emit(tx: &mpsc::UnboundedSender<OutputEntry>, entry: OutputEntry) -> Result<()> {
    tx.send(entry)
        .map_err(|_| anyhow::anyhow!("Output queue closed while workers were still running"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CheckError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Checker whose outcome is driven by the line contents:
    /// `ok`, `fail`, `ignore`, `retry`, `bad` (parse failure), `skip`
    /// (prefilter failure)
    struct ScriptedChecker {
        clients_created: AtomicU64,
    }

    impl ScriptedChecker {
        fn new() -> Self {
            Self {
                clients_created: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl Checker for ScriptedChecker {
        type Record = String;
        type Client = ();

        fn quick_validate(&self, line: &str) -> bool {
            !line.starts_with("skip")
        }

        fn parse(&self, line: &str) -> Option<String> {
            if line.starts_with("bad") {
                None
            } else {
                Some(line.to_string())
            }
        }

        async fn create_client(
            &self,
            _proxy: Option<crate::proxy::Proxy>,
        ) -> Result<(), CheckError> {
            self.clients_created.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn process(
            &self,
            record: &String,
            _client: &mut (),
            _cancel: &CancellationToken,
        ) -> Result<ProcessOutcome, CheckError> {
            if record.starts_with("retry") {
                Ok(ProcessOutcome::Retry(None))
            } else if record.starts_with("fail") {
                Ok(ProcessOutcome::Failed)
            } else if record.starts_with("ignore") {
                Ok(ProcessOutcome::Ignored)
            } else if record.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(ProcessOutcome::Success(vec![]))
            } else {
                Ok(ProcessOutcome::Success(vec![]))
            }
        }
    }

    fn write_input(lines: &[&str]) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn engine_in(
        dir: &std::path::Path,
        max_retries: u32,
        parallelism: usize,
    ) -> CheckerEngine<ScriptedChecker> {
        let writer_config = WriterConfig {
            success_path: Some(dir.join("success.txt")),
            failed_path: Some(dir.join("failed.txt")),
            ignored_path: Some(dir.join("ignored.txt")),
            append_to_existing: false,
            ..WriterConfig::default()
        };
        CheckerEngine::new(
            Arc::new(ScriptedChecker::new()),
            ProxyRotator::default(),
            writer_config,
            None,
            EngineConfig {
                parallelism,
                max_retries,
                input_channel_capacity: 64,
            },
        )
    }

    #[tokio::test]
    async fn test_empty_input_completes() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&[]);
        let engine = engine_in(dir.path(), 0, 2);

        engine.run(input.path()).await.unwrap();

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.processed_lines, 0);
        assert_eq!(snap.processed_bytes, 0);
    }

    #[tokio::test]
    async fn test_mixed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        // 100 lines; every third is a success, the rest fail
        let lines: Vec<String> = (1..=100)
            .map(|i| {
                if i % 3 == 0 {
                    format!("ok{}", i)
                } else {
                    format!("fail{}", i)
                }
            })
            .collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let input = write_input(&refs);

        let engine = engine_in(dir.path(), 0, 4);
        engine.run(input.path()).await.unwrap();

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.success, 33);
        assert_eq!(snap.failed, 67);
        assert_eq!(snap.ignored, 0);

        let success = std::fs::read_to_string(dir.path().join("success.txt")).unwrap();
        let mut got: Vec<&str> = success.lines().collect();
        got.sort_unstable();
        let mut want: Vec<String> = (1..=100).filter(|i| i % 3 == 0).map(|i| format!("ok{}", i)).collect();
        want.sort();
        assert_eq!(got, want.iter().map(String::as_str).collect::<Vec<_>>());

        let failed = std::fs::read_to_string(dir.path().join("failed.txt")).unwrap();
        assert_eq!(failed.lines().count(), 67);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_becomes_failed() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["retry:x:y"]);

        let engine = engine_in(dir.path(), 2, 1);
        engine.run(input.path()).await.unwrap();

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.success, 0);

        let failed = std::fs::read_to_string(dir.path().join("failed.txt")).unwrap();
        assert_eq!(failed, "retry:x:y\n");
    }

    #[tokio::test]
    async fn test_fresh_client_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["retry:a"]);

        let checker = Arc::new(ScriptedChecker::new());
        let engine = CheckerEngine::new(
            Arc::clone(&checker),
            ProxyRotator::default(),
            WriterConfig {
                failed_path: Some(dir.path().join("failed.txt")),
                append_to_existing: false,
                ..WriterConfig::default()
            },
            None,
            EngineConfig {
                parallelism: 1,
                max_retries: 3,
                input_channel_capacity: 8,
            },
        );
        engine.run(input.path()).await.unwrap();

        // Initial attempt plus three retries, each with its own client
        assert_eq!(checker.clients_created.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_prefilter_reject_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["skip-me", "bad-parse", "ok"]);

        let engine = engine_in(dir.path(), 0, 1);
        let writer_stats = engine.writer_stats();
        engine.run(input.path()).await.unwrap();

        let snap = engine.metrics().snapshot();
        assert_eq!(snap.ignored, 2);
        assert_eq!(snap.success, 1);

        // Only the parse failure reaches the ignored sink; the prefilter
        // reject is never written
        let ignored = std::fs::read_to_string(dir.path().join("ignored.txt")).unwrap();
        assert_eq!(ignored, "bad-parse\n");
        assert_eq!(writer_stats.dropped_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_sink_drops_entries() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["bad-parse", "fail1"]);

        let engine = CheckerEngine::new(
            Arc::new(ScriptedChecker::new()),
            ProxyRotator::default(),
            WriterConfig {
                success_path: Some(dir.path().join("success.txt")),
                append_to_existing: false,
                ..WriterConfig::default()
            },
            None,
            EngineConfig {
                parallelism: 1,
                max_retries: 0,
                input_channel_capacity: 8,
            },
        );
        let writer_stats = engine.writer_stats();
        engine.run(input.path()).await.unwrap();

        assert_eq!(writer_stats.dropped_entry_count(), 2);
        assert_eq!(writer_stats.total_entries_written(), 0);
    }

    #[tokio::test]
    async fn test_processed_bytes_reaches_file_length() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["ok1", "ok2", "ok3"]);
        let file_len = std::fs::metadata(input.path()).unwrap().len();

        let engine = engine_in(dir.path(), 0, 2);
        engine.run(input.path()).await.unwrap();

        assert_eq!(engine.metrics().snapshot().processed_bytes, file_len);
    }

    #[tokio::test]
    async fn test_engine_is_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&["ok"]);
        let engine = engine_in(dir.path(), 0, 1);

        engine.run(input.path()).await.unwrap();
        assert!(engine.run(input.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_stops_run() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..500).map(|i| format!("slow{}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let input = write_input(&refs);

        let engine = Arc::new(engine_in(dir.path(), 0, 2));
        let run = {
            let engine = Arc::clone(&engine);
            let path = input.path().to_path_buf();
            tokio::spawn(async move { engine.run(&path).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        engine.cancel();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("cancelled run must wind down promptly")
            .unwrap()
            .unwrap();

        // Far from all 500 slow records can have completed
        assert!(engine.metrics().snapshot().processed_lines < 500);
    }

    #[tokio::test]
    async fn test_pause_holds_new_records() {
        let dir = tempfile::tempdir().unwrap();
        let lines: Vec<String> = (0..50).map(|i| format!("slow{}", i)).collect();
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let input = write_input(&refs);

        let engine = Arc::new(engine_in(dir.path(), 0, 2));
        let run = {
            let engine = Arc::clone(&engine);
            let path = input.path().to_path_buf();
            tokio::spawn(async move { engine.run(&path).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.pause();
        // In-flight records (up to one per worker) finish, then progress stops
        tokio::time::sleep(Duration::from_millis(300)).await;
        let during_pause = engine.metrics().snapshot().processed_lines;
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(engine.metrics().snapshot().processed_lines, during_pause);

        engine.resume();
        tokio::time::timeout(Duration::from_secs(30), run)
            .await
            .expect("resumed run should finish")
            .unwrap()
            .unwrap();
        assert_eq!(engine.metrics().snapshot().processed_lines, 50);
    }
}

//! Engine lifecycle controller
//!
//! Wraps the single-use [`CheckerEngine`] in a state machine the UIs drive:
//!
//! ```text
//! Idle -> Running <-> Paused
//!         Running -> Completed | Cancelled | Error
//!         any     -> Idle (reset)
//! ```
//!
//! `initialize` validates settings, proves the output directory writable,
//! loads proxies and constructs the engine; `start` optionally extracts the
//! unprocessed tail of the input into a temp file so a resumed run begins
//! exactly at the checkpointed byte.

use crate::checker::Checker;
use crate::checkpoint::CheckpointManager;
use crate::engine::{CheckerEngine, EngineConfig};
use crate::metrics::RunMetrics;
use crate::proxy::{ProxyRotator, parse_proxy_list};
use crate::settings::AppSettings;
use crate::writer::{LineFormatter, WriterConfig};
use anyhow::{Context, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Error => "Error",
        };
        f.write_str(name)
    }
}

/// State change notification carried on the watch channel
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub state: EngineState,
    pub error: Option<String>,
}

/// Settings failed validation; the run was not started
#[derive(Debug)]
pub struct ValidationError {
    pub problems: Vec<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Settings validation failed: {}", self.problems.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Shared, cloneable controller around one engine at a time
pub struct EngineController<C: Checker> {
    inner: Arc<ControllerInner<C>>,
}

impl<C: Checker> Clone for EngineController<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ControllerInner<C: Checker> {
    checker: Arc<C>,
    formatter: Option<LineFormatter>,
    settings: Mutex<AppSettings>,
    settings_path: PathBuf,
    checkpoints: CheckpointManager,
    state_tx: watch::Sender<StateEvent>,
    engine: Mutex<Option<Arc<CheckerEngine<C>>>>,
    cancel_requested: AtomicBool,
}

impl<C: Checker> EngineController<C> {
    pub fn new(
        checker: Arc<C>,
        formatter: Option<LineFormatter>,
        settings: AppSettings,
        settings_path: PathBuf,
    ) -> Self {
        let (state_tx, _) = watch::channel(StateEvent {
            state: EngineState::Idle,
            error: None,
        });
        Self {
            inner: Arc::new(ControllerInner {
                checker,
                formatter,
                settings: Mutex::new(settings),
                checkpoints: CheckpointManager::new(settings_path.clone()),
                settings_path,
                state_tx,
                engine: Mutex::new(None),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.state_tx.borrow().state
    }

    /// Subscribe to state transitions
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StateEvent> {
        self.inner.state_tx.subscribe()
    }

    #[must_use]
    pub fn settings(&self) -> AppSettings {
        self.inner.settings.lock().unwrap().clone()
    }

    /// Replace settings (Idle only) and persist them
    pub fn update_settings(&self, settings: AppSettings) -> Result<()> {
        anyhow::ensure!(
            self.state() == EngineState::Idle,
            "Settings can only change while idle"
        );
        settings.save(&self.inner.settings_path)?;
        *self.inner.settings.lock().unwrap() = settings;
        Ok(())
    }

    /// Saved resume offset, when still applicable to the configured input
    #[must_use]
    pub fn resume_position(&self) -> Option<u64> {
        let settings = self.inner.settings.lock().unwrap();
        self.inner.checkpoints.resume_position(&settings)
    }

    /// Metrics of the current engine, when one is constructed
    #[must_use]
    pub fn metrics(&self) -> Option<Arc<RunMetrics>> {
        self.inner
            .engine
            .lock()
            .unwrap()
            .as_ref()
            .map(|e| e.metrics())
    }

    /// Validate settings, prepare outputs, load proxies, construct the engine
    ///
    /// `resuming` selects append mode for the output files so a resumed run
    /// extends the previous run's results instead of truncating them.
    pub fn initialize(&self, resuming: bool) -> Result<()> {
        anyhow::ensure!(
            self.state() == EngineState::Idle,
            "Engine can only initialize from Idle (currently {})",
            self.state()
        );

        let settings = self.settings();
        let problems = settings.validate();
        if !problems.is_empty() {
            return Err(ValidationError { problems }.into());
        }

        // Prove the output directory writable before spawning anything
        std::fs::create_dir_all(&settings.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                settings.output_dir.display()
            )
        })?;
        let probe = settings.output_dir.join(".write_test");
        std::fs::write(&probe, b"ok")
            .and_then(|()| std::fs::remove_file(&probe))
            .with_context(|| {
                format!(
                    "Output directory {} is not writable",
                    settings.output_dir.display()
                )
            })?;

        let proxies = match &settings.proxy_path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read proxy file {}", path.display()))?;
                let list = parse_proxy_list(&contents, settings.proxy_type);
                anyhow::ensure!(
                    !list.proxies.is_empty(),
                    "Proxy file {} contains no usable proxies ({} unparseable line(s))",
                    path.display(),
                    list.failed.len()
                );
                info!(
                    "Loaded {} proxies ({} line(s) failed to parse)",
                    list.proxies.len(),
                    list.failed.len()
                );
                ProxyRotator::new(list.proxies)
            }
            None => ProxyRotator::default(),
        };

        let writer_config = WriterConfig {
            success_path: Some(settings.output_dir.join("success.txt")),
            failed_path: Some(settings.output_dir.join("failed.txt")),
            ignored_path: None,
            append_to_existing: resuming,
            ..WriterConfig::default()
        };

        let engine = CheckerEngine::new(
            Arc::clone(&self.inner.checker),
            proxies,
            writer_config,
            self.inner.formatter.clone(),
            EngineConfig {
                parallelism: settings.parallelism,
                max_retries: settings.max_retries,
                ..EngineConfig::default()
            },
        );

        *self.inner.engine.lock().unwrap() = Some(Arc::new(engine));
        self.inner.cancel_requested.store(false, Ordering::Release);
        Ok(())
    }

    /// Run the initialized engine to completion
    ///
    /// With `resume_from_byte > 0` the unprocessed tail of the input is
    /// extracted into a temp file first; the temp file is removed once the
    /// run ends, whatever the outcome.
    pub async fn start(&self, resume_from_byte: u64) -> Result<()> {
        let engine = self
            .inner
            .engine
            .lock()
            .unwrap()
            .clone()
            .context("Engine not initialized")?;

        let settings = self.settings();
        let (input_path, temp_path) = if resume_from_byte > 0 {
            let temp =
                CheckpointManager::create_resume_temp(&settings.input_path, resume_from_byte)
                    .await?;
            (temp.clone(), Some(temp))
        } else {
            (settings.input_path.clone(), None)
        };

        self.transition(EngineState::Running, None);
        let result = engine.run(&input_path).await;

        if let Some(temp) = temp_path {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                warn!("Failed to remove resume temp file {}: {}", temp.display(), e);
            }
        }

        let outcome = match result {
            Ok(()) => {
                if self.inner.cancel_requested.load(Ordering::Acquire) {
                    // Voluntary shutdown: remember where to pick up
                    let offset = resume_from_byte + engine.metrics().processed_bytes();
                    let mut settings = self.inner.settings.lock().unwrap();
                    if let Err(e) = self
                        .inner
                        .checkpoints
                        .save_checkpoint(&mut settings, offset)
                    {
                        warn!("Failed to save resume checkpoint: {}", e);
                    }
                    self.transition(EngineState::Cancelled, None);
                    Ok(())
                } else {
                    let mut settings = self.inner.settings.lock().unwrap();
                    if let Err(e) = self.inner.checkpoints.clear_checkpoint(&mut settings) {
                        warn!("Failed to clear resume checkpoint: {}", e);
                    }
                    self.transition(EngineState::Completed, None);
                    Ok(())
                }
            }
            Err(e) => {
                self.transition(EngineState::Error, Some(e.to_string()));
                Err(e)
            }
        };

        *self.inner.engine.lock().unwrap() = None;
        outcome
    }

    /// Pause the running engine
    pub fn pause(&self) -> Result<()> {
        anyhow::ensure!(
            self.state() == EngineState::Running,
            "Can only pause a running engine"
        );
        if let Some(engine) = self.inner.engine.lock().unwrap().as_ref() {
            engine.pause();
        }
        self.transition(EngineState::Paused, None);
        Ok(())
    }

    /// Resume a paused engine
    pub fn resume(&self) -> Result<()> {
        anyhow::ensure!(
            self.state() == EngineState::Paused,
            "Can only resume a paused engine"
        );
        if let Some(engine) = self.inner.engine.lock().unwrap().as_ref() {
            engine.resume();
        }
        self.transition(EngineState::Running, None);
        Ok(())
    }

    /// Request a voluntary stop; the run winds down and saves a checkpoint
    pub fn stop(&self) {
        self.inner.cancel_requested.store(true, Ordering::Release);
        if let Some(engine) = self.inner.engine.lock().unwrap().as_ref() {
            // A paused engine must observe cancellation too
            engine.resume();
            engine.cancel();
        }
    }

    /// Return to Idle so a new run can be configured
    pub fn reset(&self) {
        *self.inner.engine.lock().unwrap() = None;
        self.inner.cancel_requested.store(false, Ordering::Release);
        self.transition(EngineState::Idle, None);
    }

    fn transition(&self, state: EngineState, error: Option<String>) {
        info!("Engine state -> {}", state);
        let _ = self.inner.state_tx.send(StateEvent { state, error });
    }
}

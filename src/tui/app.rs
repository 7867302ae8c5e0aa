//! TUI application state and logic

use crate::checker::Checker;
use crate::engine::{EngineController, EngineState, StateEvent};
use crate::metrics::MetricsSnapshot;
use crate::settings::AppSettings;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::error;

/// Editable fields of the configuration dialog, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    InputPath,
    ProxyPath,
    OutputDir,
    Parallelism,
    MaxRetries,
}

impl ConfigField {
    pub const ALL: [ConfigField; 5] = [
        Self::InputPath,
        Self::ProxyPath,
        Self::OutputDir,
        Self::Parallelism,
        Self::MaxRetries,
    ];

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::InputPath => "Input file",
            Self::ProxyPath => "Proxy file (blank for none)",
            Self::OutputDir => "Output directory",
            Self::Parallelism => "Parallelism",
            Self::MaxRetries => "Max retries",
        }
    }
}

/// In-progress edits of the configuration dialog
#[derive(Debug, Clone)]
pub struct ConfigDraft {
    pub values: [String; 5],
    pub selected: usize,
}

impl ConfigDraft {
    fn from_settings(settings: &AppSettings) -> Self {
        Self {
            values: [
                settings.input_path.display().to_string(),
                settings
                    .proxy_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                settings.output_dir.display().to_string(),
                settings.parallelism.to_string(),
                settings.max_retries.to_string(),
            ],
            selected: 0,
        }
    }

    /// Apply the draft onto `settings`; numeric fields fall back to the
    /// previous value when unparseable
    fn apply(&self, settings: &mut AppSettings) {
        settings.input_path = PathBuf::from(self.values[0].trim());
        settings.proxy_path = {
            let trimmed = self.values[1].trim();
            (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
        };
        settings.output_dir = PathBuf::from(self.values[2].trim());
        if let Ok(parallelism) = self.values[3].trim().parse() {
            settings.parallelism = parallelism;
        }
        if let Ok(max_retries) = self.values[4].trim().parse() {
            settings.max_retries = max_retries;
        }
    }
}

/// Overlay currently shown above the dashboard
#[derive(Debug, Clone)]
pub enum Modal {
    None,
    Config(ConfigDraft),
    Error(String),
    ResumePrompt(u64),
}

/// TUI application state around one engine controller
pub struct TuiApp<C: Checker> {
    controller: EngineController<C>,
    events: watch::Receiver<StateEvent>,
    /// Latest metrics; survives the engine so final numbers stay visible
    snapshot: MetricsSnapshot,
    pub modal: Modal,
    last_error_shown: Option<String>,
    pub should_quit: bool,
}

impl<C: Checker> TuiApp<C> {
    pub fn new(controller: EngineController<C>) -> Self {
        let events = controller.subscribe();
        Self {
            controller,
            events,
            snapshot: MetricsSnapshot::default(),
            modal: Modal::None,
            last_error_shown: None,
            should_quit: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.controller.state()
    }

    #[must_use]
    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }

    #[must_use]
    pub fn settings(&self) -> AppSettings {
        self.controller.settings()
    }

    /// Refresh the snapshot and surface new engine errors as a modal
    pub fn update(&mut self) {
        if let Some(metrics) = self.controller.metrics() {
            self.snapshot = metrics.snapshot();
        }

        let event = self.events.borrow_and_update().clone();
        if event.state == EngineState::Error {
            if let Some(message) = event.error {
                if self.last_error_shown.as_deref() != Some(message.as_str()) {
                    self.last_error_shown = Some(message.clone());
                    self.modal = Modal::Error(message);
                }
            }
        }
    }

    /// F1 - open the configuration dialog (idle only)
    pub fn open_config(&mut self) {
        if self.state() == EngineState::Idle && matches!(self.modal, Modal::None) {
            self.modal = Modal::Config(ConfigDraft::from_settings(&self.settings()));
        }
    }

    /// F5 - start a run, prompting for resume when a checkpoint applies
    pub fn request_start(&mut self) {
        match self.state() {
            EngineState::Running | EngineState::Paused => return,
            EngineState::Idle => {}
            // A finished controller goes back to Idle first
            _ => self.controller.reset(),
        }

        match self.controller.resume_position() {
            Some(offset) => self.modal = Modal::ResumePrompt(offset),
            None => self.launch(0),
        }
    }

    /// Answer to the resume prompt
    pub fn confirm_resume(&mut self, resume: bool) {
        if let Modal::ResumePrompt(offset) = self.modal {
            self.modal = Modal::None;
            self.launch(if resume { offset } else { 0 });
        }
    }

    fn launch(&mut self, resume_from: u64) {
        if let Err(e) = self.controller.initialize(resume_from > 0) {
            self.modal = Modal::Error(format!("{:#}", e));
            return;
        }
        let controller = self.controller.clone();
        tokio::spawn(async move {
            // Errors also arrive through the state channel; log for the file
            if let Err(e) = controller.start(resume_from).await {
                error!("Run failed: {:#}", e);
            }
        });
    }

    /// F6 - toggle pause
    pub fn toggle_pause(&mut self) {
        let result = match self.state() {
            EngineState::Running => self.controller.pause(),
            EngineState::Paused => self.controller.resume(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.modal = Modal::Error(e.to_string());
        }
    }

    /// F7 - voluntary stop with checkpoint
    pub fn request_stop(&mut self) {
        if matches!(self.state(), EngineState::Running | EngineState::Paused) {
            self.controller.stop();
        }
    }

    /// Ctrl-Q - quit, stopping any run first
    pub fn request_quit(&mut self) {
        self.request_stop();
        self.should_quit = true;
    }

    /// Keystroke routed into the config dialog; returns true when consumed
    pub fn config_input(&mut self, key: ConfigKey) -> bool {
        let Modal::Config(draft) = &mut self.modal else {
            return false;
        };
        match key {
            ConfigKey::Up => {
                draft.selected = draft.selected.saturating_sub(1);
            }
            ConfigKey::Down => {
                draft.selected = (draft.selected + 1).min(ConfigField::ALL.len() - 1);
            }
            ConfigKey::Char(c) => draft.values[draft.selected].push(c),
            ConfigKey::Backspace => {
                draft.values[draft.selected].pop();
            }
            ConfigKey::Save => {
                let finished = draft.clone();
                let mut settings = self.settings();
                finished.apply(&mut settings);
                let result = self.controller.update_settings(settings);
                self.modal = match result {
                    Ok(()) => Modal::None,
                    Err(e) => Modal::Error(format!("{:#}", e)),
                };
            }
            ConfigKey::Cancel => self.modal = Modal::None,
        }
        true
    }

    /// Dismiss an error modal
    pub fn dismiss_modal(&mut self) {
        if matches!(self.modal, Modal::Error(_)) {
            self.modal = Modal::None;
        }
    }
}

/// Abstracted dialog keystrokes (keeps app logic testable off-terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    Up,
    Down,
    Char(char),
    Backspace,
    Save,
    Cancel,
}

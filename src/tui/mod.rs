//! Terminal User Interface (TUI) for interactive runs
//!
//! Dashboard with live metrics and a progress bar, a configuration dialog,
//! and the key bindings advertised in the status bar (F1 Config, F5 Start,
//! F6 Pause, F7 Stop, Ctrl-Q Quit).

mod app;
mod ui;

pub use app::{ConfigKey, Modal, TuiApp};
pub use ui::render_ui;

use crate::checker::Checker;
use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::time::Duration;

/// Run the TUI event loop until the user quits
///
/// Takes over the terminal (raw mode + alternate screen) and restores it on
/// exit, including on error.
pub async fn run_tui<C: Checker>(mut app: TuiApp<C>) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = run_app(&mut terminal, &mut app).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app<B: ratatui::backend::Backend, C: Checker>(
    terminal: &mut Terminal<B>,
    app: &mut TuiApp<C>,
) -> Result<()> {
    // 4 Hz refresh keeps the metrics lively without burning a core
    let mut update_interval = tokio::time::interval(Duration::from_millis(250));

    loop {
        terminal.draw(|f| ui::render_ui(f, app))?;

        tokio::select! {
            _ = update_interval.tick() => {
                app.update();

                while event::poll(Duration::from_millis(0))? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind == KeyEventKind::Press {
                            handle_key(app, key.code, key.modifiers);
                        }
                    }
                }

                if app.should_quit {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn handle_key<C: Checker>(app: &mut TuiApp<C>, code: KeyCode, modifiers: KeyModifiers) {
    // Modal overlays consume input first
    if matches!(app.modal, Modal::Config(_)) {
        let _ = match code {
            KeyCode::Up => app.config_input(ConfigKey::Up),
            KeyCode::Down => app.config_input(ConfigKey::Down),
            KeyCode::Backspace => app.config_input(ConfigKey::Backspace),
            KeyCode::Enter => app.config_input(ConfigKey::Save),
            KeyCode::Esc => app.config_input(ConfigKey::Cancel),
            KeyCode::Char(c) => app.config_input(ConfigKey::Char(c)),
            _ => true,
        };
        return;
    }
    if matches!(app.modal, Modal::Error(_)) {
        if matches!(code, KeyCode::Enter | KeyCode::Esc) {
            app.dismiss_modal();
        }
        return;
    }
    if matches!(app.modal, Modal::ResumePrompt(_)) {
        match code {
            KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                app.confirm_resume(true);
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                app.confirm_resume(false);
            }
            _ => {}
        }
        return;
    }

    match code {
        KeyCode::F(1) => app.open_config(),
        KeyCode::F(5) => app.request_start(),
        KeyCode::F(6) => app.toggle_pause(),
        KeyCode::F(7) => app.request_stop(),
        KeyCode::Char('q') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.request_quit();
        }
        _ => {}
    }
}

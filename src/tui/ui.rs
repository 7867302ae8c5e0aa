//! TUI rendering and layout

use crate::checker::Checker;
use crate::engine::EngineState;
use crate::tui::app::{ConfigField, Modal, TuiApp};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, List, ListItem, Paragraph},
};

const ACCENT: Color = Color::Cyan;
const LABEL: Color = Color::Gray;
const GOOD: Color = Color::Green;
const BAD: Color = Color::Red;
const WARN: Color = Color::Yellow;

/// Render the main UI
pub fn render_ui<C: Checker>(f: &mut Frame, app: &TuiApp<C>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(1), // menu bar
            Constraint::Length(3), // title / state
            Constraint::Length(3), // progress
            Constraint::Min(8),    // metrics
            Constraint::Length(1), // status bar
        ])
        .split(f.area());

    render_menu(f, chunks[0]);
    render_title(f, chunks[1], app);
    render_progress(f, chunks[2], app);
    render_metrics(f, chunks[3], app);
    render_status_bar(f, chunks[4]);

    match &app.modal {
        Modal::None => {}
        Modal::Config(_) => render_config_dialog(f, app),
        Modal::Error(message) => render_error_modal(f, message),
        Modal::ResumePrompt(offset) => render_resume_prompt(f, *offset),
    }
}

fn render_menu(f: &mut Frame, area: Rect) {
    let menu = Paragraph::new(Line::from(vec![
        Span::styled(" File ", Style::default().fg(ACCENT)),
        Span::raw("  "),
        Span::styled(" Help ", Style::default().fg(ACCENT)),
    ]))
    .style(Style::default().bg(Color::DarkGray));
    f.render_widget(menu, area);
}

fn render_title<C: Checker>(f: &mut Frame, area: Rect, app: &TuiApp<C>) {
    let state = app.state();
    let state_color = match state {
        EngineState::Running => GOOD,
        EngineState::Paused => WARN,
        EngineState::Error => BAD,
        _ => LABEL,
    };

    let title = Paragraph::new(Line::from(vec![
        Span::styled(
            "Checkerbase ",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled("- Batch Checker", Style::default().fg(Color::White)),
        Span::styled("   State: ", Style::default().fg(LABEL)),
        Span::styled(
            state.to_string(),
            Style::default().fg(state_color).add_modifier(Modifier::BOLD),
        ),
    ]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(ACCENT)),
    )
    .alignment(Alignment::Center);

    f.render_widget(title, area);
}

fn render_progress<C: Checker>(f: &mut Frame, area: Rect, app: &TuiApp<C>) {
    let snap = app.snapshot();
    let ratio = (snap.progress_percent / 100.0).clamp(0.0, 1.0);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(ACCENT))
        .ratio(ratio)
        .label(format!(
            "{:.1}%  ({} / {} bytes)  ETA {}",
            snap.progress_percent, snap.processed_bytes, snap.total_bytes,
            snap.format_eta(),
        ));
    f.render_widget(gauge, area);
}

fn render_metrics<C: Checker>(f: &mut Frame, area: Rect, app: &TuiApp<C>) {
    let snap = app.snapshot();
    let settings = app.settings();

    let lines = vec![
        metric_line("Lines processed", snap.processed_lines.to_string(), LABEL),
        metric_line("Success", snap.success.to_string(), GOOD),
        metric_line("Failed", snap.failed.to_string(), BAD),
        metric_line("Ignored", snap.ignored.to_string(), LABEL),
        metric_line("Retries", snap.retries.to_string(), WARN),
        metric_line("Checks / minute", format!("{:.0}", snap.cpm), ACCENT),
        metric_line(
            "Throughput",
            format!("{:.2} MB/s", snap.bytes_per_sec / (1024.0 * 1024.0)),
            ACCENT,
        ),
        metric_line("Elapsed", snap.format_elapsed(), LABEL),
        metric_line("Input", settings.input_path.display().to_string(), LABEL),
        metric_line("Output", settings.output_dir.display().to_string(), LABEL),
    ];

    let list = List::new(lines.into_iter().map(ListItem::new).collect::<Vec<_>>()).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Live metrics"),
    );
    f.render_widget(list, area);
}

fn metric_line(label: &str, value: String, color: Color) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{:<18}", label), Style::default().fg(LABEL)),
        Span::styled(value, Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ])
}

fn render_status_bar(f: &mut Frame, area: Rect) {
    let bar = Paragraph::new(Line::from(vec![
        Span::styled(" F1 ", Style::default().fg(Color::Black).bg(ACCENT)),
        Span::raw(" Config  "),
        Span::styled(" F5 ", Style::default().fg(Color::Black).bg(ACCENT)),
        Span::raw(" Start  "),
        Span::styled(" F6 ", Style::default().fg(Color::Black).bg(ACCENT)),
        Span::raw(" Pause  "),
        Span::styled(" F7 ", Style::default().fg(Color::Black).bg(ACCENT)),
        Span::raw(" Stop  "),
        Span::styled(" Ctrl-Q ", Style::default().fg(Color::Black).bg(ACCENT)),
        Span::raw(" Quit"),
    ]));
    f.render_widget(bar, area);
}

/// Centered overlay rectangle
fn centered_rect(width_percent: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * width_percent / 100;
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    Rect {
        x,
        y,
        width,
        height: height.min(area.height),
    }
}

fn render_config_dialog<C: Checker>(f: &mut Frame, app: &TuiApp<C>) {
    let Modal::Config(draft) = &app.modal else {
        return;
    };
    let area = centered_rect(70, (ConfigField::ALL.len() as u16) + 4, f.area());
    f.render_widget(Clear, area);

    let mut lines = Vec::new();
    for (i, field) in ConfigField::ALL.iter().enumerate() {
        let marker = if i == draft.selected { "> " } else { "  " };
        let style = if i == draft.selected {
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White)
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{}{:<28}", marker, field.label()), style),
            Span::styled(draft.values[i].clone(), Style::default().fg(WARN)),
        ]));
    }
    lines.push(Line::raw(""));
    lines.push(Line::styled(
        "Enter: save   Esc: cancel   Up/Down: select",
        Style::default().fg(LABEL),
    ));

    let dialog = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Configuration")
            .border_style(Style::default().fg(ACCENT)),
    );
    f.render_widget(dialog, area);
}

fn render_error_modal(f: &mut Frame, message: &str) {
    let area = centered_rect(60, 7, f.area());
    f.render_widget(Clear, area);

    let dialog = Paragraph::new(vec![
        Line::styled(message.to_string(), Style::default().fg(BAD)),
        Line::raw(""),
        Line::styled("Press Enter to dismiss", Style::default().fg(LABEL)),
    ])
    .wrap(ratatui::widgets::Wrap { trim: true })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Error")
            .border_style(Style::default().fg(BAD)),
    );
    f.render_widget(dialog, area);
}

fn render_resume_prompt(f: &mut Frame, offset: u64) {
    let area = centered_rect(60, 7, f.area());
    f.render_widget(Clear, area);

    let dialog = Paragraph::new(vec![
        Line::from(format!(
            "A checkpoint exists at byte offset {}.",
            offset
        )),
        Line::raw(""),
        Line::styled(
            "Y: resume from checkpoint   N: start over",
            Style::default().fg(LABEL),
        ),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Resume run?")
            .border_style(Style::default().fg(WARN)),
    );
    f.render_widget(dialog, area);
}

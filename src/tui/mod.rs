mod help;
mod state;

use crate::cli::{build_config, Cli};
use crate::engine::backend::BackendClient;
use crate::model::{BatchState, PendingFile, UploadEvent};
use crate::notify::Notification;
use crate::orchestrator::{self, UiCommand};
use crate::report::{outcome_status, render_detail, render_summary};
use crate::selection::{format_size, FileSelectionStage, SelectionSource};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableBracketedPaste, EnableBracketedPaste, Event, KeyCode, KeyEventKind,
        KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{severity_color, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    // A bad base URL or header must fail here, before the terminal is taken over.
    let cfg = build_config(&args);
    let client = BackendClient::new(&cfg).context("configure backend client")?;

    // Unbounded channels avoid backpressure between the engine and the render loop.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<UploadEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let max_errors = cfg.max_error_messages;
    let ui_handle = std::thread::spawn(move || run_threaded(args, max_errors, event_rx, cmd_tx));

    let res = orchestrator::run_controller(cfg, client, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    args: Cli,
    max_errors: usize,
    mut event_rx: UnboundedReceiver<UploadEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableBracketedPaste).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        selection: FileSelectionStage::new(args.dedup),
        max_errors,
        ..Default::default()
    };
    if !args.files.is_empty() {
        let report = state
            .selection
            .select_paths(SelectionSource::Picker, &args.files);
        for n in report.notifications() {
            state.push_toast(n);
        }
    }
    if args.upload_on_launch {
        if let Some(files) = state.begin_batch() {
            send_upload(&mut state, &cmd_tx, files);
        }
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(ev);
        }

        if last_tick.elapsed() >= tick_rate {
            let now = Instant::now();
            state.prune_toasts(now);
            state.maybe_reveal_results(now);
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = now;
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if !event::poll(Duration::from_millis(10)).unwrap_or(false) {
            continue;
        }
        let k = match event::read() {
            Ok(Event::Key(k)) => k,
            Ok(Event::Paste(text)) => {
                match state.input.as_mut() {
                    Some(input) => input.push_str(&text),
                    None => state.add_paths(SelectionSource::Drop, &text),
                }
                continue;
            }
            _ => continue,
        };
        if k.kind != KeyEventKind::Press {
            continue;
        }

        // The add-file prompt captures all keys while open.
        if let Some(input) = state.input.as_mut() {
            match k.code {
                KeyCode::Enter => {
                    let text = std::mem::take(input);
                    state.input = None;
                    state.add_paths(SelectionSource::Picker, &text);
                }
                KeyCode::Esc => state.input = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(c) => input.push(c),
                _ => {}
            }
            continue;
        }

        match (k.modifiers, k.code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                let _ = cmd_tx.send(UiCommand::Quit);
                break Ok(());
            }
            (_, KeyCode::Tab) => {
                state.tab = (state.tab + 1) % 3;
                state.detail_open = false;
            }
            (_, KeyCode::Char('?')) => state.tab = 2,
            (_, KeyCode::Char('a')) if state.tab == 0 => state.input = Some(String::new()),
            (_, KeyCode::Char('u')) if state.tab == 0 => {
                if let Some(files) = state.begin_batch() {
                    send_upload(&mut state, &cmd_tx, files);
                }
            }
            (_, KeyCode::Char('x')) => {
                if state.is_uploading() {
                    let _ = cmd_tx.send(UiCommand::Cancel);
                } else {
                    state.push_toast(Notification::info("No upload running"));
                }
            }
            (_, KeyCode::Char('c')) if state.tab == 0 => {
                state.clear_pending();
                state.push_toast(Notification::info("Upload list cleared"));
            }
            (_, KeyCode::Delete) | (_, KeyCode::Backspace) if state.tab == 0 => {
                state.remove_selected_pending();
            }
            (_, KeyCode::Up) | (_, KeyCode::Char('k')) => match state.tab {
                0 => state.pending_selected = state.pending_selected.saturating_sub(1),
                1 if !state.detail_open => {
                    state.results_selected = state.results_selected.saturating_sub(1)
                }
                _ => {}
            },
            (_, KeyCode::Down) | (_, KeyCode::Char('j')) => match state.tab {
                0 => {
                    let max = state.selection.pending().len().saturating_sub(1);
                    state.pending_selected = (state.pending_selected + 1).min(max);
                }
                1 if !state.detail_open => {
                    let max = state.outcomes.len().saturating_sub(1);
                    state.results_selected = (state.results_selected + 1).min(max);
                }
                _ => {}
            },
            (_, KeyCode::Enter) if state.tab == 1 => {
                state.detail_open = state.selected_outcome().is_some();
            }
            (_, KeyCode::Esc) => state.detail_open = false,
            (_, KeyCode::Char('d')) if state.tab == 1 => {
                let target = state.selected_outcome().map(|o| {
                    (
                        o.error_file_id().map(str::to_string),
                        o.file_name.clone(),
                    )
                });
                match target {
                    Some((Some(upload_id), file_name)) => {
                        let _ = cmd_tx.send(UiCommand::DownloadErrors {
                            upload_id,
                            file_name,
                        });
                    }
                    Some((None, file_name)) => state.push_toast(Notification::info(format!(
                        "No error file for {file_name}"
                    ))),
                    None => {}
                }
            }
            _ => {}
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, DisableBracketedPaste, LeaveAlternateScreen).ok();
    res
}

/// Hand a batch to the controller. If it is gone the files go back to the pending set.
fn send_upload(state: &mut UiState, cmd_tx: &UnboundedSender<UiCommand>, files: Vec<PendingFile>) {
    if let Err(mpsc::error::SendError(UiCommand::Upload(files))) =
        cmd_tx.send(UiCommand::Upload(files))
    {
        state.reject_batch(files, "Upload service is not running".into());
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(toast_height(state)),
            ]
            .as_ref(),
        )
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Upload"),
        Line::from(format!("Results ({})", state.outcomes.len())),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("ingredient-upload"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_upload(chunks[1], f, state),
        1 => draw_results(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }

    draw_toasts(chunks[2], f, state);
}

fn toast_height(state: &UiState) -> u16 {
    if state.toasts.is_empty() {
        0
    } else {
        state.toasts.len() as u16 + 2
    }
}

fn key_hint(key: &'static str, action: &'static str) -> Vec<Span<'static>> {
    vec![
        Span::styled(key, Style::default().fg(Color::Magenta)),
        Span::raw(format!(": {action}  ")),
    ]
}

fn draw_upload(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let prompt_height = if state.input.is_some() { 3 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(prompt_height),
                Constraint::Min(3),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    if let Some(input) = &state.input {
        let p = Paragraph::new(Line::from(vec![
            Span::raw(input.clone()),
            Span::styled("█", Style::default().fg(Color::Gray)),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Add files (Enter to add, Esc to cancel)"),
        );
        f.render_widget(p, chunks[0]);
    }

    let pending = state.selection.pending();
    let mut lines: Vec<Line> = Vec::new();
    let mut hints = Vec::new();
    hints.extend(key_hint("a", "add"));
    hints.extend(key_hint("del", "remove"));
    hints.extend(key_hint("c", "clear"));
    if state.selection.can_upload() && !state.is_uploading() {
        hints.extend(key_hint("u", "upload"));
    }
    if state.is_uploading() {
        hints.extend(key_hint("x", "cancel"));
    }
    lines.push(Line::from(hints));
    lines.push(Line::from(""));

    if pending.is_empty() {
        let msg = if state.is_uploading() {
            "Uploading… files added now go into the next batch."
        } else {
            "No files selected. Press 'a' or drop .xls/.xlsx files onto the terminal."
        };
        lines.push(Line::from(Span::styled(msg, Style::default().fg(Color::Gray))));
    }

    // Keep the selected entry visible.
    let max_items = (chunks[1].height as usize).saturating_sub(4).max(1);
    let offset = state
        .pending_selected
        .saturating_sub(max_items.saturating_sub(1));
    for (i, p) in pending.iter().enumerate().skip(offset).take(max_items) {
        let selected = i == state.pending_selected;
        let style = if selected {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{:>3}. {}", i + 1, p.name), style),
            Span::styled(
                format!("  {}  {}", format_size(p.size_bytes), p.mime_or_extension),
                Style::default().fg(Color::Gray),
            ),
        ]));
    }

    let title = format!("Pending files ({})", pending.len());
    let list = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(list, chunks[1]);

    let (ratio, label, color) = match (&state.progress, state.batch_state) {
        (Some(p), _) => (
            (p.percent / 100.0).clamp(0.0, 1.0),
            format!("{:.0}% {}", p.percent, p.status),
            Color::Green,
        ),
        (None, BatchState::Failed) => (0.0, "Upload failed".to_string(), Color::Red),
        (None, BatchState::Cancelled) => (0.0, "Upload cancelled".to_string(), Color::Yellow),
        (None, _) => (0.0, "Idle".to_string(), Color::Gray),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, chunks[2]);
}

fn draw_results(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)].as_ref())
        .split(area);

    let mut summary: Vec<Line> = render_summary(&state.tally)
        .into_iter()
        .map(Line::from)
        .collect();
    let state_label = match &state.last_report {
        Some(r) => match r.abort_reason.as_deref() {
            Some(reason) if r.state != BatchState::Completed => {
                format!("{} ({reason})", r.state.label())
            }
            _ => r.state.label().to_string(),
        },
        None => state.batch_state.label().to_string(),
    };
    summary.push(Line::from(vec![
        Span::styled("State: ", Style::default().fg(Color::Gray)),
        Span::raw(state_label),
    ]));
    let title = match &state.batch_id {
        Some(id) => format!("Summary (batch {id})"),
        None => "Summary".to_string(),
    };
    f.render_widget(
        Paragraph::new(summary).block(Block::default().borders(Borders::ALL).title(title)),
        chunks[0],
    );

    if state.detail_open {
        if let Some(o) = state.selected_outcome() {
            let detail = render_detail(o, state.max_errors);
            let mut lines: Vec<Line> = detail.lines().into_iter().map(Line::from).collect();
            lines.push(Line::from(""));
            let mut hints = key_hint("esc", "back");
            if detail.download_id.is_some() {
                hints.extend(key_hint("d", "download failed rows"));
            }
            lines.push(Line::from(hints));
            let p = Paragraph::new(lines)
                .wrap(Wrap { trim: false })
                .block(Block::default().borders(Borders::ALL).title("Details"));
            f.render_widget(p, chunks[1]);
            return;
        }
    }

    let mut lines: Vec<Line> = Vec::new();
    let mut hints = key_hint("↑/↓/j/k", "navigate");
    hints.extend(key_hint("enter", "details"));
    hints.extend(key_hint("d", "download errors"));
    lines.push(Line::from(hints));
    lines.push(Line::from(""));

    if state.outcomes.is_empty() {
        lines.push(Line::from(Span::styled(
            "No results yet.",
            Style::default().fg(Color::Gray),
        )));
    }

    let max_items = (chunks[1].height as usize).saturating_sub(4).max(1);
    let offset = state
        .results_selected
        .saturating_sub(max_items.saturating_sub(1));
    for (i, o) in state.outcomes.iter().enumerate().skip(offset).take(max_items) {
        let status = outcome_status(o);
        let status_color = match status {
            "OK" => Color::Green,
            "PARTIAL" => Color::Yellow,
            _ => Color::Red,
        };
        let name_style = if i == state.results_selected {
            Style::default().add_modifier(Modifier::REVERSED)
        } else {
            Style::default()
        };
        let counts = if o.rows_known {
            format!(
                "  {} ok / {} failed / {} total",
                o.succeeded_rows, o.failed_rows, o.total_rows
            )
        } else {
            format!(
                "  {}",
                o.error_messages.first().map(String::as_str).unwrap_or("refused")
            )
        };
        let mut spans = vec![
            Span::styled(format!("{:>3}. ", i + 1), name_style),
            Span::styled(format!("{status:<8}"), Style::default().fg(status_color)),
            Span::styled(o.file_name.clone(), name_style),
            Span::raw(counts),
        ];
        if o.error_file_id().is_some() {
            spans.push(Span::styled("  [error file]", Style::default().fg(Color::Cyan)));
        }
        lines.push(Line::from(spans));
    }

    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Files")),
        chunks[1],
    );
}

fn draw_toasts(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    if area.height == 0 {
        return;
    }
    let lines: Vec<Line> = state
        .toasts
        .iter()
        .map(|t| {
            Line::from(vec![
                Span::styled(
                    format!("{:<8}", t.note.severity.label()),
                    Style::default().fg(severity_color(t.note.severity)),
                ),
                Span::raw(t.note.message.clone()),
            ])
        })
        .collect();
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Notifications")),
        area,
    );
}

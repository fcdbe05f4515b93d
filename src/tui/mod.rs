mod help;
mod state;

use crate::actions::ActionKind;
use crate::cli::Cli;
use crate::config::Settings;
use crate::model::{TaskEvent, TaskOutcome, TaskPhase, TaskState};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Tabs},
    Terminal,
};
use state::{ModalDraft, TaskView, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli, settings: Settings) -> Result<()> {
    // Unbounded channels avoid backpressure and task switching in the hot path.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<TaskEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let timeout_label = settings
        .timeout
        .map(|t| humantime::format_duration(t).to_string());
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_args, timeout_label, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&settings, event_tx, cmd_rx).await;

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
    timeout_label: Option<String>,
    mut event_rx: UnboundedReceiver<TaskEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        timeout_label,
        ..Default::default()
    };
    if let Some(action) = args.action {
        if let Some(i) = ActionKind::ALL.iter().position(|a| *a == action) {
            state.selected = i;
        }
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                TaskEvent::Progress(update) => state.apply_progress(&update),
                TaskEvent::Completed { outcome, state: snapshot } => {
                    handle_run_completed(&args, &mut state, &outcome, &snapshot);
                }
                TaskEvent::Info(info) => state.info = info.to_message(),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let cmds = if k.modifiers == KeyModifiers::CONTROL && k.code == KeyCode::Char('c')
                {
                    vec![UiCommand::Quit]
                } else {
                    state.handle_key(k.code)
                };
                let quit = cmds.iter().any(|c| matches!(c, UiCommand::Quit));
                for cmd in cmds {
                    tracing::debug!(?cmd, "ui command");
                    let _ = cmd_tx.send(cmd);
                }
                if quit {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn handle_run_completed(
    args: &Cli,
    state: &mut UiState,
    outcome: &TaskOutcome,
    snapshot: &TaskState,
) {
    state.record_completion(outcome, snapshot);

    let Some(request) = state.last_request.clone() else {
        return;
    };
    let processed = orchestrator::process_run_completion(
        args.export_json.as_deref(),
        &request,
        snapshot,
        outcome,
        state.progress_updates,
    );
    tracing::info!(
        run_id = %processed.report.run_id,
        action = request.action.slug(),
        phase = %processed.report.phase,
        "run finished"
    );
    if !processed.export_messages.is_empty() {
        state.info = format!("{}; {}", state.info, processed.export_messages.join("; "));
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Actions"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("taskdeck"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_board(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn draw_board(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Min(0),    // Action list
                Constraint::Length(5), // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let mut lines = Vec::new();
    let mut persona = None;
    for (i, kind) in ActionKind::ALL.iter().enumerate() {
        if persona != Some(kind.persona()) {
            if persona.is_some() {
                lines.push(Line::from(""));
            }
            persona = Some(kind.persona());
            lines.push(Line::from(Span::styled(
                kind.persona().label(),
                Style::default().fg(Color::Gray),
            )));
        }
        let selected = i == state.selected;
        let marker = if selected { "▸ " } else { "  " };
        let style = if selected {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::raw(marker),
            Span::styled(format!("{:<18}", kind.title()), style),
            Span::styled(kind.default_target(), Style::default().fg(Color::Cyan)),
        ]));
    }
    let list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Actions (Enter to open)"),
    );
    f.render_widget(list, main[0]);

    draw_status(main[1], f, state);

    if let Some(action) = state.focused() {
        if let Some(draft) = state.modals.payload(action) {
            draw_modal(centered(area, 70, 18), f, draft, state.task.as_ref(), state);
        }
    }
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines = vec![Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.clone()),
    ])];
    for entry in state.recent.iter().take(area.height.saturating_sub(3) as usize) {
        lines.push(Line::from(Span::styled(
            entry.clone(),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let status = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, area);
}

fn phase_color(phase: TaskPhase) -> Color {
    match phase {
        TaskPhase::Idle => Color::Gray,
        TaskPhase::Validating | TaskPhase::Running => Color::Yellow,
        TaskPhase::Succeeded => Color::Green,
        TaskPhase::Failed => Color::Red,
        TaskPhase::Cancelled => Color::Magenta,
    }
}

fn draw_modal(
    area: Rect,
    f: &mut ratatui::Frame,
    draft: &ModalDraft,
    task: Option<&TaskView>,
    state: &UiState,
) {
    let request = &draft.request;
    let action = request.action;
    f.render_widget(Clear, area);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("{} [{}]", action.title(), action.persona().label()));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // Request
                Constraint::Min(3),    // Steps
                Constraint::Length(3), // Gauge
                Constraint::Length(2), // Phase / keys
            ]
            .as_ref(),
        )
        .split(inner);

    let params = request
        .params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    let mut header = vec![
        Line::from(vec![
            Span::styled("Target: ", Style::default().fg(Color::Gray)),
            Span::raw(request.target.clone()),
        ]),
        Line::from(vec![
            Span::styled("Params: ", Style::default().fg(Color::Gray)),
            Span::raw(if params.is_empty() { "-".to_string() } else { params }),
        ]),
    ];
    if let Some(t) = state.timeout_label.as_ref() {
        header.push(Line::from(vec![
            Span::styled("Timeout: ", Style::default().fg(Color::Gray)),
            Span::raw(t.clone()),
        ]));
    }
    f.render_widget(Paragraph::new(header), rows[0]);

    f.render_widget(
        Paragraph::new(step_lines(request, task)).block(
            Block::default()
                .borders(Borders::TOP)
                .title("Steps (1-9 to toggle)"),
        ),
        rows[1],
    );

    let phase = task.map(|t| t.phase).unwrap_or(TaskPhase::Idle);
    let percent = task.map(|t| t.percent).unwrap_or(0);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(phase_color(phase)))
        .percent(u16::from(percent.min(100)));
    f.render_widget(gauge, rows[2]);

    let mut footer = vec![Span::styled(
        phase.as_str(),
        Style::default().fg(phase_color(phase)),
    )];
    if let Some(err) = task.and_then(|t| t.error.as_ref()) {
        footer.push(Span::raw(": "));
        footer.push(Span::styled(err.clone(), Style::default().fg(Color::Red)));
    }
    let keys = if phase.is_active() {
        "c cancel  Esc close"
    } else if phase.is_terminal() {
        "Enter rerun  r reset  Esc close"
    } else {
        "Enter start  Esc close"
    };
    f.render_widget(
        Paragraph::new(vec![
            Line::from(footer),
            Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray))),
        ]),
        rows[3],
    );
}

/// Checklist of the action's catalog steps: selection plus progress through the run.
fn step_lines(request: &crate::model::TaskRequest, task: Option<&TaskView>) -> Vec<Line<'static>> {
    let defaults = request.action.default_steps();
    if defaults.is_empty() {
        return vec![Line::from(Span::styled(
            "single step",
            Style::default().fg(Color::Gray),
        ))];
    }

    // While a run is shown, steps refer to the run's selection, not the live draft.
    let run_steps = task
        .map(|t| t.steps.as_slice())
        .unwrap_or(request.steps.as_slice());
    let current = task.and_then(|t| t.step_index);
    let phase = task.map(|t| t.phase).unwrap_or(TaskPhase::Idle);

    defaults
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let selected = run_steps.iter().any(|s| s == step);
            let pos = run_steps.iter().position(|s| s == step);
            let (mark, color) = match (selected, pos, current) {
                (false, _, _) => ("[ ]", Color::DarkGray),
                (true, _, _) if phase == TaskPhase::Succeeded => ("[✓]", Color::Green),
                (true, Some(p), Some(c)) if p < c => ("[✓]", Color::Green),
                (true, Some(p), Some(c)) if p == c && phase == TaskPhase::Running => {
                    ("[▶]", Color::Yellow)
                }
                _ => ("[x]", Color::White),
            };
            Line::from(vec![
                Span::raw(format!("  {} ", i + 1)),
                Span::styled(mark, Style::default().fg(color)),
                Span::raw(" "),
                Span::raw(step.to_string()),
            ])
        })
        .collect()
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

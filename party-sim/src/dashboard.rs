//! Terminal dashboard for the simulator

use crate::metrics::{format_position, LogLevel, Metrics, SimStatus};
use crate::sim::{self, SimOptions};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use parking_lot::RwLock;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState},
    Frame, Terminal,
};
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use watchparty_core::SyncStatus;

/// Dashboard state for scrolling etc.
struct DashboardState {
    /// Log scroll position (0 = most recent at bottom)
    log_scroll: usize,
    /// Whether auto-scroll is enabled (follows new logs)
    auto_scroll: bool,
}

/// Run the dashboard
pub async fn run(metrics: Arc<RwLock<Metrics>>, options: SimOptions) -> Result<(), Box<dyn std::error::Error>> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Start the simulation in background; failures land in the activity log
    let metrics_for_sim = Arc::clone(&metrics);
    let simulation = tokio::spawn(async move {
        let _ = sim::run(metrics_for_sim, options).await;
    });

    // Dashboard state
    let mut state = DashboardState {
        log_scroll: 0,
        auto_scroll: true,
    };

    // Main loop
    let tick_rate = Duration::from_millis(100);
    let mut should_quit = false;
    let mut seen_logs = 0;

    while !should_quit {
        // Follow new log entries
        let log_count = metrics.read().logs.len();
        if log_count != seen_logs {
            seen_logs = log_count;
            if state.auto_scroll {
                state.log_scroll = 0;
            }
        }

        // Draw
        terminal.draw(|f| draw(f, &metrics, &state))?;

        // Handle input
        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let log_count = metrics.read().logs.len();

                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => should_quit = true,
                        KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => {
                            should_quit = true
                        }
                        // Scroll up (older logs)
                        KeyCode::Up | KeyCode::Char('k') => {
                            if log_count > 0 {
                                state.log_scroll = (state.log_scroll + 1).min(log_count.saturating_sub(1));
                                state.auto_scroll = false;
                            }
                        }
                        // Scroll down (newer logs)
                        KeyCode::Down | KeyCode::Char('j') => {
                            if state.log_scroll > 0 {
                                state.log_scroll -= 1;
                            }
                            if state.log_scroll == 0 {
                                state.auto_scroll = true;
                            }
                        }
                        // Page up
                        KeyCode::PageUp => {
                            if log_count > 0 {
                                state.log_scroll = (state.log_scroll + 10).min(log_count.saturating_sub(1));
                                state.auto_scroll = false;
                            }
                        }
                        // Page down
                        KeyCode::PageDown => {
                            state.log_scroll = state.log_scroll.saturating_sub(10);
                            if state.log_scroll == 0 {
                                state.auto_scroll = true;
                            }
                        }
                        // Home - oldest logs
                        KeyCode::Home => {
                            if log_count > 0 {
                                state.log_scroll = log_count.saturating_sub(1);
                                state.auto_scroll = false;
                            }
                        }
                        // End - newest logs (enable auto-scroll)
                        KeyCode::End => {
                            state.log_scroll = 0;
                            state.auto_scroll = true;
                        }
                        // Toggle auto-scroll
                        KeyCode::Char('a') => {
                            state.auto_scroll = !state.auto_scroll;
                            if state.auto_scroll {
                                state.log_scroll = 0;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    simulation.abort();

    // Cleanup
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}

/// Draw the dashboard
fn draw(f: &mut Frame, metrics: &Arc<RwLock<Metrics>>, state: &DashboardState) {
    let m = metrics.read();

    // Main layout
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),  // Header
            Constraint::Length(10), // Party
            Constraint::Min(10),    // Logs
            Constraint::Length(1),  // Footer
        ])
        .split(f.area());

    // Header
    draw_header(f, chunks[0], &m);

    // Stats
    draw_stats(f, chunks[1], &m);

    // Logs
    draw_logs(f, chunks[2], &m, state);

    // Footer
    draw_footer(f, chunks[3], state);
}

fn draw_header(f: &mut Frame, area: Rect, m: &Metrics) {
    let status_style = match m.status {
        SimStatus::Starting => Style::default().fg(Color::Yellow),
        SimStatus::Running => Style::default().fg(Color::Green),
        SimStatus::Error => Style::default().fg(Color::Red),
    };

    let status_text = match m.status {
        SimStatus::Starting => "STARTING",
        SimStatus::Running => "RUNNING",
        SimStatus::Error => "ERROR",
    };

    let title = vec![
        Line::from(vec![
            Span::styled("Watch Party Simulator", Style::default().add_modifier(Modifier::BOLD)),
            Span::raw("  │  Status: "),
            Span::styled(status_text, status_style),
            Span::raw("  │  Uptime: "),
            Span::styled(m.uptime(), Style::default().fg(Color::Cyan)),
        ])
    ];

    let header = Paragraph::new(title)
        .block(Block::default().borders(Borders::ALL).title(" Dashboard "));

    f.render_widget(header, area);
}

fn draw_stats(f: &mut Frame, area: Rect, m: &Metrics) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(70),
        ])
        .split(area);

    let room_id = m.room_id.clone().unwrap_or_else(|| "creating...".to_string());

    let summary = vec![
        Line::from(vec![
            Span::raw("Room: "),
            Span::styled(room_id, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Channel: "),
            Span::styled(
                format!("{}ms ±{}ms", m.latency_ms, m.jitter_ms),
                Style::default().fg(Color::Cyan),
            ),
        ]),
        Line::from(vec![
            Span::raw("Synced: "),
            Span::styled(
                format!("{} / {}", m.synced_count(), m.participants.len()),
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Corrections: "),
            Span::styled(m.total_corrections.to_string(), Style::default().fg(Color::Magenta)),
        ]),
        Line::from(vec![
            Span::raw("Stalls: "),
            Span::styled(m.total_stalls.to_string(), Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Peak drift: "),
            Span::styled(format!("{:.2}s", m.peak_drift), Style::default().fg(Color::White)),
        ]),
    ];

    let summary_block = Paragraph::new(summary)
        .block(Block::default().borders(Borders::ALL).title(" Party "));
    f.render_widget(summary_block, chunks[0]);

    let rows: Vec<ListItem> = m
        .participants
        .iter()
        .map(|p| {
            let status_style = match p.status {
                SyncStatus::Synced => Style::default().fg(Color::Green),
                SyncStatus::Drifted => Style::default().fg(Color::Magenta),
                SyncStatus::Buffering => Style::default().fg(Color::Yellow),
                SyncStatus::Waiting => Style::default().fg(Color::DarkGray),
            };
            let role = if p.is_host { "★" } else { " " };
            let state = if p.stalled {
                "stalled"
            } else if p.playing {
                "playing"
            } else {
                "paused"
            };
            let drift = p
                .drift
                .map(|d| format!("{:+.2}s", d))
                .unwrap_or_else(|| "-".to_string());

            ListItem::new(Line::from(vec![
                Span::styled(format!("{} {:<10} ", role, p.name), Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(format!("{:<10}", p.status.as_str()), status_style),
                Span::raw(format!("{:>9} ", format_position(p.position))),
                Span::styled(format!("{:<8}", state), Style::default().fg(Color::Cyan)),
                Span::raw(format!("drift {:>7}  ", drift)),
                Span::styled(format!("seeks {:<3} ", p.corrections), Style::default().fg(Color::Magenta)),
                Span::styled(p.dialect, Style::default().fg(Color::DarkGray)),
            ]))
        })
        .collect();

    let participants = List::new(rows)
        .block(Block::default().borders(Borders::ALL).title(" Participants "));
    f.render_widget(participants, chunks[1]);
}

fn draw_logs(f: &mut Frame, area: Rect, m: &Metrics, state: &DashboardState) {
    let visible_height = area.height.saturating_sub(2) as usize;
    let total_logs = m.logs.len();

    // Calculate which logs to show based on scroll position
    let log_items: Vec<ListItem> = m.logs
        .iter()
        .rev()
        .skip(state.log_scroll)
        .take(visible_height)
        .map(|entry| {
            let level_style = match entry.level {
                LogLevel::Info => Style::default().fg(Color::Blue),
                LogLevel::Warning => Style::default().fg(Color::Yellow),
                LogLevel::Sync => Style::default().fg(Color::Magenta),
                LogLevel::Chat => Style::default().fg(Color::Green),
            };

            let time = entry.timestamp.format("%H:%M:%S").to_string();

            ListItem::new(Line::from(vec![
                Span::styled(format!("{} ", time), Style::default().fg(Color::DarkGray)),
                Span::styled(format!("[{}] ", entry.level.as_str()), level_style),
                Span::raw(&entry.message),
            ]))
        })
        .collect();

    // Title with scroll indicator
    let scroll_indicator = if state.auto_scroll {
        " [AUTO] ".to_string()
    } else if total_logs > 0 {
        format!(" [{}/{}] ", total_logs - state.log_scroll, total_logs)
    } else {
        String::new()
    };

    let logs = List::new(log_items)
        .block(Block::default().borders(Borders::ALL).title(format!(" Activity Log{}", scroll_indicator)));

    f.render_widget(logs, area);

    // Render scrollbar if there are more logs than visible
    if total_logs > visible_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("↑"))
            .end_symbol(Some("↓"));

        let mut scrollbar_state = ScrollbarState::new(total_logs)
            .position(total_logs.saturating_sub(state.log_scroll + visible_height));

        f.render_stateful_widget(
            scrollbar,
            area.inner(ratatui::layout::Margin { vertical: 1, horizontal: 0 }),
            &mut scrollbar_state,
        );
    }
}

fn draw_footer(f: &mut Frame, area: Rect, state: &DashboardState) {
    let auto_text = if state.auto_scroll { "ON " } else { "OFF" };
    let auto_color = if state.auto_scroll { Color::Green } else { Color::Yellow };

    let footer = Paragraph::new(Line::from(vec![
        Span::styled(" Q ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Quit  "),
        Span::styled(" ↑↓ ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Scroll  "),
        Span::styled(" PgUp/Dn ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Page  "),
        Span::styled(" A ", Style::default().fg(Color::Black).bg(Color::White)),
        Span::raw(" Auto-scroll: "),
        Span::styled(auto_text, Style::default().fg(auto_color)),
    ]));

    f.render_widget(footer, area);
}

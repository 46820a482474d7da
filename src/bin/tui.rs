//! Fleet TUI - interactive fleet status board
//!
//! Drives a `FleetEngine` in-process and displays:
//! - Connection state, countdown to next sync, last successful update
//! - Status counts (VOR / On Route / Yard / Running Defect)
//! - Vehicle table with status filter and id search
//!
//! Logs go to a file so they don't tear the terminal.

use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fleet_sync::domain::source::ALLOWED_INTERVALS_MS;
use fleet_sync::domain::{FleetQuery, SourceConfig, SourceType, VehicleRecord, VehicleStatus};
use fleet_sync::infra::{Config, Metrics};
use fleet_sync::services::{ConnectionState, EngineSettings, FleetEngine, FleetSnapshot};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Fleet TUI - live fleet status board
#[derive(Parser, Debug)]
#[command(name = "fleet-tui", version, about)]
struct Args {
    /// Path to TOML configuration file (default: CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Workbook to attach for fileUpload sources
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Log file (the terminal is owned by the UI)
    #[arg(long, default_value = "fleet-tui.log")]
    log_file: PathBuf,
}

/// UI-only state; the fleet itself lives in the engine
struct App {
    engine: Arc<FleetEngine>,
    source: SourceConfig,
    file: Option<PathBuf>,
    filter: Option<VehicleStatus>,
    search: String,
    searching: bool,
    table: TableState,
    notice: Option<String>,
    notices: mpsc::UnboundedReceiver<String>,
    notice_tx: mpsc::UnboundedSender<String>,
}

impl App {
    fn new(engine: Arc<FleetEngine>, source: SourceConfig, file: Option<PathBuf>) -> Self {
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let mut table = TableState::default();
        table.select(Some(0));
        Self {
            engine,
            source,
            file,
            filter: None,
            search: String::new(),
            searching: false,
            table,
            notice: None,
            notices,
            notice_tx,
        }
    }

    fn query(&self) -> FleetQuery {
        FleetQuery { status: self.filter, search: self.search.clone() }
    }

    fn connect(&self) {
        let engine = self.engine.clone();
        let source = self.source.clone();
        let tx = self.notice_tx.clone();
        tokio::spawn(async move {
            let notice = match engine.connect(source).await {
                Ok(()) => "connected".to_string(),
                Err(e) => e.to_string(),
            };
            let _ = tx.send(notice);
        });
    }

    /// Disconnect drops the attached workbook, so re-read it on demand
    fn attach_file(&mut self) {
        let Some(path) = &self.file else {
            self.notice = Some("no workbook path configured".to_string());
            return;
        };
        self.notice = Some(match std::fs::read(path) {
            Ok(bytes) => {
                self.engine.attach_file(bytes);
                format!("attached {}", path.display())
            }
            Err(e) => format!("cannot read {}: {}", path.display(), e),
        });
    }

    fn cycle_filter(&mut self) {
        self.filter = match self.filter {
            None => Some(VehicleStatus::ALL[0]),
            Some(status) if status == VehicleStatus::ALL[3] => None,
            Some(status) => Some(status.next()),
        };
        self.table.select(Some(0));
    }

    fn cycle_interval(&mut self) {
        let current = ALLOWED_INTERVALS_MS.iter().position(|&ms| ms == self.source.interval_ms);
        let next = current.map(|i| (i + 1) % ALLOWED_INTERVALS_MS.len()).unwrap_or(0);
        let interval_ms = ALLOWED_INTERVALS_MS[next];
        self.notice = Some(match self.engine.set_interval(interval_ms) {
            Ok(()) => {
                self.source.interval_ms = interval_ms;
                format!("interval set to {}s", interval_ms / 1000)
            }
            Err(e) => e.to_string(),
        });
    }

    fn cycle_selected_status(&mut self, visible: &[VehicleRecord]) {
        let Some(vehicle) = self.table.selected().and_then(|i| visible.get(i)) else {
            return;
        };
        let next = vehicle.status.next();
        if self.engine.change_status(vehicle.id, next) {
            self.notice = Some(format!("HGV {} -> {}", vehicle.id, next));
        }
    }

    fn move_selection(&mut self, delta: isize, len: usize) {
        if len == 0 {
            self.table.select(None);
            return;
        }
        let current = self.table.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.table.select(Some(next as usize));
    }

    /// Returns false when the user asked to quit
    fn handle_key(&mut self, code: KeyCode, visible: &[VehicleRecord]) -> bool {
        if self.searching {
            match code {
                KeyCode::Enter | KeyCode::Esc => self.searching = false,
                KeyCode::Backspace => {
                    self.search.pop();
                }
                KeyCode::Char(c) => {
                    self.search.push(c);
                    self.table.select(Some(0));
                }
                _ => {}
            }
            return true;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return false,
            KeyCode::Char('c') => self.connect(),
            KeyCode::Char('a') => self.attach_file(),
            KeyCode::Char('d') => {
                self.engine.disconnect();
                self.notice = Some("disconnected".to_string());
            }
            KeyCode::Char('x') => {
                self.engine.clear_all();
                self.notice = Some("all vehicles set to Yard".to_string());
            }
            KeyCode::Char('f') => self.cycle_filter(),
            KeyCode::Char('i') => self.cycle_interval(),
            KeyCode::Char('/') => self.searching = true,
            KeyCode::Char('s') | KeyCode::Enter => self.cycle_selected_status(visible),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1, visible.len()),
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1, visible.len()),
            KeyCode::PageDown => self.move_selection(20, visible.len()),
            KeyCode::PageUp => self.move_selection(-20, visible.len()),
            _ => {}
        }
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_file = File::create(&args.log_file)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    info!(git_hash = %env!("GIT_HASH"), "fleet-tui starting");

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&[]),
    };
    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(FleetEngine::new(EngineSettings::from_config(&config), metrics)?);

    let file = args.file.clone().or_else(|| config.source_file().map(PathBuf::from));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(engine.clone(), config.source_config(), file);
    if config.source_type() == SourceType::FileUpload {
        app.attach_file();
    }
    let result = run_ui(&mut terminal, &mut app).await;

    engine.disconnect();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    info!("fleet-tui stopped");
    result
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    loop {
        while let Ok(notice) = app.notices.try_recv() {
            app.notice = Some(notice);
        }

        let snapshot = app.engine.snapshot();
        let visible = app.engine.query(&app.query());
        if app.table.selected().map_or(true, |i| i >= visible.len()) && !visible.is_empty() {
            app.table.select(Some(visible.len() - 1));
        }
        terminal.draw(|f| draw_ui(f, app, &snapshot, &visible))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && !app.handle_key(key.code, &visible) {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn status_color(status: VehicleStatus) -> Color {
    match status {
        VehicleStatus::Vor => Color::Red,
        VehicleStatus::OnRoute => Color::Green,
        VehicleStatus::Yard => Color::Blue,
        VehicleStatus::RunningDefect => Color::Yellow,
    }
}

fn draw_ui(f: &mut Frame, app: &mut App, snapshot: &FleetSnapshot, visible: &[VehicleRecord]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(4), // Counts
            Constraint::Min(0),    // Vehicles
            Constraint::Length(3), // Footer
        ])
        .split(f.area());

    draw_header(f, chunks[0], app, snapshot);
    draw_counts(f, chunks[1], snapshot);
    draw_vehicles(f, chunks[2], app, visible, snapshot.vehicles.len());
    draw_footer(f, chunks[3], app);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, snapshot: &FleetSnapshot) {
    let (state_text, state_color) = match &snapshot.connection {
        ConnectionState::Idle => ("IDLE".to_string(), Color::DarkGray),
        ConnectionState::Connecting => ("CONNECTING".to_string(), Color::Yellow),
        ConnectionState::Connected => ("CONNECTED".to_string(), Color::Green),
        ConnectionState::Updating => ("UPDATING".to_string(), Color::Cyan),
        ConnectionState::Error(msg) => (format!("ERROR: {}", msg), Color::Red),
    };

    let last = snapshot
        .last_success
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let next = if snapshot.connection.is_live() {
        format!("{}s", snapshot.countdown_secs)
    } else {
        "-".to_string()
    };

    let header = Paragraph::new(Line::from(vec![
        Span::styled("Fleet Sync ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw("| "),
        Span::styled(state_text, Style::default().fg(state_color)),
        Span::raw(format!(" | Source: {}", app.source.source_type.as_str())),
        Span::raw(workbook_text(app)),
        Span::raw(format!(" | Every {}s", app.source.interval_ms / 1000)),
        Span::raw(" | Next: "),
        Span::styled(next, Style::default().fg(Color::Yellow)),
        Span::raw(" | Last update: "),
        Span::raw(last),
    ]))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(header, area);
}

fn workbook_text(app: &App) -> String {
    if app.source.source_type != SourceType::FileUpload {
        return String::new();
    }
    let state = if app.engine.has_file() { "attached" } else { "none (press a)" };
    format!(" | Workbook: {}", state)
}

fn draw_counts(f: &mut Frame, area: Rect, snapshot: &FleetSnapshot) {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25); 4])
        .split(area);

    for (i, status) in VehicleStatus::ALL.into_iter().enumerate() {
        let color = status_color(status);
        let count = Paragraph::new(Line::from(Span::styled(
            format!("{}", snapshot.counts.get(status)),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )))
        .block(
            Block::default()
                .title(format!(" {} ", status.label()))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color)),
        );
        f.render_widget(count, columns[i]);
    }
}

fn draw_vehicles(f: &mut Frame, area: Rect, app: &mut App, visible: &[VehicleRecord], total: usize) {
    let rows: Vec<Row> = visible
        .iter()
        .map(|v| {
            Row::new(vec![
                Cell::from(format!("{:>4}", v.id)),
                Cell::from(Span::styled(v.status.label(), Style::default().fg(status_color(v.status)))),
                Cell::from(v.location.clone()),
                Cell::from(v.driver.clone()),
                Cell::from(v.last_updated.format("%d/%m %H:%M:%S").to_string()),
            ])
        })
        .collect();

    let filter = app.filter.map(|s| s.label()).unwrap_or("All");
    let title = format!(" Vehicles {}/{} | Filter: {} ", visible.len(), total, filter);

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(16),
            Constraint::Percentage(35),
            Constraint::Percentage(30),
            Constraint::Length(16),
        ],
    )
    .header(
        Row::new(vec!["HGV", "Status", "Location", "Driver", "Updated"])
            .style(Style::default().add_modifier(Modifier::BOLD)),
    )
    .block(Block::default().title(title).borders(Borders::ALL))
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(table, area, &mut app.table);
}

fn draw_footer(f: &mut Frame, area: Rect, app: &App) {
    let line = if app.searching {
        Line::from(vec![
            Span::styled("Search HGV: ", Style::default().fg(Color::Yellow)),
            Span::raw(app.search.clone()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ])
    } else {
        let mut spans = vec![Span::raw(
            "c connect  d disconnect  a attach  i interval  f filter  / search  s status  x clear  q quit",
        )];
        if !app.search.is_empty() {
            spans.push(Span::styled(
                format!("  [search: {}]", app.search),
                Style::default().fg(Color::Yellow),
            ));
        }
        if let Some(notice) = &app.notice {
            spans.push(Span::styled(format!("  {}", notice), Style::default().fg(Color::Cyan)));
        }
        Line::from(spans)
    };

    f.render_widget(Paragraph::new(line).block(Block::default().borders(Borders::ALL)), area);
}

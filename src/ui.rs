use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap},
    Frame, Terminal,
};
use recognition_wall::{
    admin, group_by_rank, AffiliateRecord, QuotePhase, RankCatalog, RecordStore, SchedulePolicy,
    Scheduler, SqliteStore, TimelineEntry,
};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Upper bound on how long we block waiting for a key, so store changes
/// show up even while a long slide is on screen
const MAX_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Display,
    Admin,
}

pub struct App {
    store: SqliteStore,
    catalog: RankCatalog,
    policy: SchedulePolicy,
    scheduler: Scheduler,
    epoch: Instant,
    revision: watch::Receiver<u64>,
    records: Vec<AffiliateRecord>,
    pub view: View,
    pub search: String,
    pub searching: bool,
    pub listing_state: TableState,
}

impl App {
    pub fn new(store: SqliteStore, catalog: RankCatalog, policy: SchedulePolicy) -> Result<Self> {
        let timeline = admin::load_timeline(&store, &catalog, &policy)?;
        let records = store.all_records()?;
        let revision = store.subscribe();

        let mut scheduler = Scheduler::new(timeline, policy);
        scheduler.start(0);

        Ok(Self {
            store,
            catalog,
            policy,
            scheduler,
            epoch: Instant::now(),
            revision,
            records,
            view: View::Display,
            search: String::new(),
            searching: false,
            listing_state: TableState::default(),
        })
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Rebuild the timeline if the store changed since the last look
    pub fn refresh(&mut self) -> Result<()> {
        if !self.revision.has_changed().unwrap_or(false) {
            return Ok(());
        }
        self.revision.borrow_and_update();

        let timeline = admin::load_timeline(&self.store, &self.catalog, &self.policy)?;
        let now = self.now_ms();
        self.scheduler.replace_timeline(timeline, now);
        self.records = self.store.all_records()?;
        self.clamp_selection();
        Ok(())
    }

    pub fn tick(&mut self) {
        let now = self.now_ms();
        self.scheduler.tick(now);
    }

    /// Time until the next scheduler deadline, capped at MAX_POLL
    pub fn poll_timeout(&self) -> Duration {
        match self.scheduler.next_deadline() {
            Some(deadline) => Duration::from_millis(deadline.saturating_sub(self.now_ms())).min(MAX_POLL),
            None => MAX_POLL,
        }
    }

    /// Switching to the admin listing freezes the slideshow; switching back
    /// restarts the current entry
    pub fn toggle_admin(&mut self) {
        match self.view {
            View::Display => {
                self.scheduler.suspend();
                self.view = View::Admin;
                if self.listing_state.selected().is_none() {
                    self.listing_state.select(Some(0));
                }
                self.clamp_selection();
            }
            View::Admin => {
                let now = self.now_ms();
                self.scheduler.resume(now);
                self.view = View::Display;
                self.searching = false;
            }
        }
    }

    /// Records in the admin listing, grouped by rank and filtered by search
    pub fn listing(&self) -> Vec<&AffiliateRecord> {
        group_by_rank(&self.records, &self.catalog, &self.search)
            .into_iter()
            .flat_map(|(_, items)| items)
            .collect()
    }

    pub fn toggle_selected_hidden(&mut self) -> Result<()> {
        let id = match self.listing_state.selected().and_then(|i| self.listing().get(i).map(|a| a.id.clone())) {
            Some(id) => id,
            None => return Ok(()),
        };
        admin::toggle_hidden(&mut self.store, &id)?;
        self.refresh()
    }

    pub fn next(&mut self) {
        let len = self.listing().len();
        if len == 0 {
            return;
        }
        let i = self.listing_state.selected().map_or(0, |i| (i + 1) % len);
        self.listing_state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let len = self.listing().len();
        if len == 0 {
            return;
        }
        let i = self.listing_state.selected().map_or(0, |i| if i == 0 { len - 1 } else { i - 1 });
        self.listing_state.select(Some(i));
    }

    fn clamp_selection(&mut self) {
        let len = self.listing().len();
        match self.listing_state.selected() {
            Some(_) if len == 0 => self.listing_state.select(None),
            Some(i) if i >= len => self.listing_state.select(Some(len - 1)),
            None if len > 0 && self.view == View::Admin => self.listing_state.select(Some(0)),
            _ => {}
        }
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res
}

fn run_app<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        app.refresh()?;
        app.tick();
        terminal.draw(|f| ui(f, app))?;

        if !event::poll(app.poll_timeout())? {
            continue;
        }

        let Event::Key(key) = event::read()? else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if app.searching {
            match key.code {
                KeyCode::Enter | KeyCode::Esc => app.searching = false,
                KeyCode::Backspace => {
                    app.search.pop();
                    app.clamp_selection();
                }
                KeyCode::Char(c) => {
                    app.search.push(c);
                    app.listing_state.select(Some(0));
                    app.clamp_selection();
                }
                _ => {}
            }
            continue;
        }

        match key.code {
            KeyCode::Char('q') => return Ok(()),
            KeyCode::Char('a') => app.toggle_admin(),
            KeyCode::Esc if app.view == View::Admin => app.toggle_admin(),
            KeyCode::Char('/') if app.view == View::Admin => app.searching = true,
            KeyCode::Char(' ') if app.view == View::Admin => app.toggle_selected_hidden()?,
            KeyCode::Down | KeyCode::Char('j') if app.view == View::Admin => app.next(),
            KeyCode::Up | KeyCode::Char('k') if app.view == View::Admin => app.previous(),
            _ => {}
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    match app.view {
        View::Display => render_entry(f, chunks[0], app.scheduler.current(), app.scheduler.quote_phase()),
        View::Admin => render_listing(f, chunks[0], app),
    }

    render_status_bar(f, chunks[1], app);
}

// ============================================================================
// DISPLAY VIEW
// ============================================================================

fn render_entry(f: &mut Frame, area: Rect, entry: &TimelineEntry, phase: QuotePhase) {
    let theme = entry.theme();
    let background = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(hex_color(&theme[1])))
        .style(Style::default().bg(hex_color(&theme[0])));
    let inner = background.inner(area);
    f.render_widget(background, area);

    match entry {
        TimelineEntry::Separator { rank_name, color, pin, .. } => {
            let mut lines = vec![
                Line::from(""),
                Line::from(Span::styled(
                    rank_name.to_uppercase(),
                    Style::default().fg(hex_color(color)).add_modifier(Modifier::BOLD),
                )),
            ];
            if let Some(pin) = pin {
                lines.push(Line::from(Span::styled(format!("◆ {}", pin), Style::default().fg(Color::Gray))));
            }
            let text = Paragraph::new(lines).alignment(Alignment::Center);
            f.render_widget(text, centered(inner, 4));
        }
        TimelineEntry::AffiliateSlide { items, rank, club_pin, .. } => {
            let columns = Layout::default()
                .direction(Direction::Horizontal)
                .constraints(vec![Constraint::Ratio(1, items.len().max(1) as u32); items.len().max(1)])
                .split(inner);

            let quote = match phase {
                QuotePhase::Quote => entry.quote_for_phase(),
                QuotePhase::Info => None,
            };

            for (item, column) in items.iter().zip(columns.iter()) {
                let lines = match quote {
                    Some(text) => vec![
                        Line::from(Span::styled(
                            format!("“{}”", text),
                            Style::default().add_modifier(Modifier::ITALIC),
                        )),
                        Line::from(""),
                        Line::from(Span::styled(format!("— {}", item.display_name), Style::default().fg(Color::Gray))),
                    ],
                    None => affiliate_lines(item, &rank.name, &rank.color, club_pin.as_deref()),
                };
                let card = Paragraph::new(lines).alignment(Alignment::Center).wrap(Wrap { trim: true });
                f.render_widget(card, centered(*column, 6));
            }
        }
        TimelineEntry::Empty { .. } => {
            let text = Paragraph::new(Line::from(Span::styled(
                "No affiliates to display",
                Style::default().fg(Color::DarkGray),
            )))
            .alignment(Alignment::Center);
            f.render_widget(text, centered(inner, 1));
        }
    }
}

fn affiliate_lines<'a>(item: &'a AffiliateRecord, rank: &'a str, color: &str, club_pin: Option<&'a str>) -> Vec<Line<'a>> {
    let mut lines = vec![
        Line::from(Span::styled(
            item.display_name.as_str(),
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(rank, Style::default().fg(hex_color(color)))),
    ];
    if let Some(country) = &item.country {
        lines.push(Line::from(country.as_str()));
    }
    if item.is_honored_member {
        let badge = match club_pin {
            Some(pin) => format!("★ Club ({})", truncate(pin, 24)),
            None => "★ Club".to_string(),
        };
        lines.push(Line::from(Span::styled(badge, Style::default().fg(Color::Yellow))));
    }
    lines
}

// ============================================================================
// ADMIN VIEW
// ============================================================================

fn render_listing(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = ["Rank", "Name", "Distributor ID", "Country", "Club", "Visible"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));

    let header = Row::new(header_cells).style(Style::default().bg(Color::DarkGray)).height(1);

    let listing = app.listing();
    let rows: Vec<Row> = listing
        .iter()
        .map(|record| {
            let rank_color = app.catalog.get(&record.rank_name).map_or(Color::White, |r| hex_color(&r.color));
            let name_style = if record.hidden {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };

            Row::new(vec![
                Cell::from(record.rank_name.clone()).style(Style::default().fg(rank_color)),
                Cell::from(truncate(&record.display_name, 30)).style(name_style),
                Cell::from(record.distributor_id.clone()),
                Cell::from(record.country.clone().unwrap_or_default()),
                Cell::from(if record.is_honored_member { "★" } else { "" }),
                Cell::from(if record.hidden { "no" } else { "yes" }),
            ])
            .height(1)
        })
        .collect();

    let title = if app.search.is_empty() {
        format!(" Affiliates ({}) ", listing.len())
    } else {
        format!(" Affiliates ({}) · search: {} ", listing.len(), app.search)
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(18),
            Constraint::Length(32),
            Constraint::Length(16),
            Constraint::Length(16),
            Constraint::Length(6),
            Constraint::Length(8),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.listing_state);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let keys = match (app.view, app.searching) {
        (View::Admin, true) => "type to search · Enter done".to_string(),
        (View::Admin, false) => "/ search · space hide/show · a back · q quit".to_string(),
        (View::Display, _) => format!(
            "{}/{} · {:?} · a admin · q quit",
            app.scheduler.current_index() + 1,
            app.scheduler.timeline().len(),
            app.scheduler.state(),
        ),
    };

    let status = Paragraph::new(Line::from(Span::styled(keys, Style::default().fg(Color::Gray))))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Cyan)));

    f.render_widget(status, area);
}

// ============================================================================
// HELPERS
// ============================================================================

/// Vertically center a block of `height` lines inside `area`
fn centered(area: Rect, height: u16) -> Rect {
    let top = area.height.saturating_sub(height) / 2;
    Rect {
        y: area.y + top,
        height: height.min(area.height),
        ..area
    }
}

/// `#rrggbb` → terminal color; anything else renders with the default color
fn hex_color(hex: &str) -> Color {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 {
        return Color::Reset;
    }
    match u32::from_str_radix(digits, 16) {
        Ok(v) => Color::Rgb(((v >> 16) & 0xff) as u8, ((v >> 8) & 0xff) as u8, (v & 0xff) as u8),
        Err(_) => Color::Reset,
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

use std::cell::Cell;
use std::collections::HashMap;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use once_cell::sync::Lazy;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, Padding, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;
use url::Url;

use crate::anonymize::{Anonymizer, Identity};
use crate::auth::{ProviderInfo, Session, SignIn};
use crate::data::FeedService;
use crate::feed::{self, Feed, Phase};
use crate::images::{self, Carousel};
use crate::kudos::{KudosRecord, Scope};
use crate::visibility::Region;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_FOCUSED_BG: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_TEXT_DARK: Color = Color::Rgb(30, 30, 46);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 4] = ["⠋", "⠙", "⠹", "⠸"];

static ANONYMIZER: Lazy<Anonymizer> = Lazy::new(Anonymizer::default);

/// Tailwind `*-200`/`*-300` swatches used by the identity palette.
fn swatch(color_class: &str) -> Color {
    match color_class.trim_start_matches("bg-") {
        "red-200" => Color::Rgb(254, 202, 202),
        "red-300" => Color::Rgb(252, 165, 165),
        "green-200" => Color::Rgb(187, 247, 208),
        "green-300" => Color::Rgb(134, 239, 172),
        "emerald-200" => Color::Rgb(167, 243, 208),
        "rose-200" => Color::Rgb(254, 205, 211),
        "lime-200" => Color::Rgb(217, 249, 157),
        "pink-200" => Color::Rgb(251, 207, 232),
        "teal-200" => Color::Rgb(153, 246, 228),
        "amber-200" => Color::Rgb(253, 230, 138),
        "orange-200" => Color::Rgb(254, 215, 170),
        "yellow-200" => Color::Rgb(254, 240, 138),
        "indigo-200" => Color::Rgb(199, 210, 254),
        "purple-200" => Color::Rgb(233, 213, 255),
        "cyan-200" => Color::Rgb(165, 243, 252),
        _ => Color::Rgb(226, 232, 240),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Theme {
    Default,
    Mono,
}

impl Theme {
    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "mono" | "monochrome" | "plain" => Theme::Mono,
            _ => Theme::Default,
        }
    }

    fn identity_style(&self, identity: &Identity) -> Style {
        match self {
            Theme::Default => Style::default()
                .fg(COLOR_TEXT_DARK)
                .bg(swatch(identity.color_class))
                .add_modifier(Modifier::BOLD),
            Theme::Mono => Style::default().add_modifier(Modifier::BOLD),
        }
    }
}

#[derive(Default)]
struct Spinner {
    index: usize,
}

impl Spinner {
    fn advance(&mut self) {
        self.index = (self.index + 1) % SPINNER_FRAMES.len();
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index]
    }
}

pub struct Options {
    pub feed_service: Arc<dyn FeedService>,
    pub feed: feed::Options,
    pub session: Option<Session>,
    pub providers: Vec<ProviderInfo>,
    pub site_url: Url,
    pub status_message: String,
    pub theme: String,
    pub config_path: String,
}

pub struct Model {
    feed: Feed,
    session: Option<Session>,
    sign_in: SignIn,
    site_url: Url,
    status_message: String,
    config_path: String,
    theme: Theme,
    selected: usize,
    carousels: HashMap<String, Carousel>,
    scroll: Cell<usize>,
    view_height: Cell<u16>,
    sentinel_row: Cell<Option<usize>>,
    spinner: Spinner,
    needs_redraw: bool,
}

impl Model {
    pub fn new(options: Options) -> Self {
        let mut feed = Feed::new(options.feed_service, options.feed);
        feed.mount();
        Self {
            feed,
            session: options.session,
            sign_in: SignIn::new(options.providers),
            site_url: options.site_url,
            status_message: options.status_message,
            config_path: options.config_path,
            theme: Theme::from_name(&options.theme),
            selected: 0,
            carousels: HashMap::new(),
            scroll: Cell::new(0),
            view_height: Cell::new(0),
            sentinel_row: Cell::new(None),
            spinner: Spinner::default(),
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            if self.poll_feed() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
                if self.observe_sentinel() {
                    self.mark_dirty();
                }
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key.code) {
                            break;
                        }
                        self.mark_dirty();
                    }
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.feed.controller().is_in_flight() {
                    self.spinner.advance();
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn poll_feed(&mut self) -> bool {
        if !self.feed.poll() {
            return false;
        }
        let count = self.feed.controller().item_count();
        if self.selected >= count {
            self.selected = count.saturating_sub(1);
        }
        true
    }

    fn observe_sentinel(&mut self) -> bool {
        let Some(row) = self.sentinel_row.get() else {
            return false;
        };
        let target = Region::new(row as i64 - self.scroll.get() as i64, 1);
        let root = Region::new(0, u32::from(self.view_height.get()));
        if self.feed.sentinel_visibility(target, root) {
            log::debug!("ui: sentinel visible, loading next page");
            return true;
        }
        false
    }

    /// Returns true when the app should quit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        if self.sign_in.is_open() {
            self.handle_sign_in_key(code);
            return false;
        }

        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('g') | KeyCode::Home => {
                self.selected = 0;
                self.scroll.set(0);
            }
            KeyCode::Char(ch @ '1'..='9') => {
                let index = ch as usize - '1' as usize;
                if self.expanded_carousel().is_some() {
                    self.with_carousel(|carousel| carousel.select(index));
                } else if index < Scope::ALL.len() {
                    self.select_scope_at(index);
                }
            }
            KeyCode::Tab => {
                let scopes = self.feed.controller().available_scopes();
                let current = self.feed.controller().effective_scope();
                let position = scopes.iter().position(|scope| *scope == current).unwrap_or(0);
                if let Some(scope) = scopes.get((position + 1) % scopes.len().max(1)).copied() {
                    self.select_scope(scope);
                }
            }
            KeyCode::Char('m') => {
                if self.feed.load_next_page() {
                    self.status_message = "Loading more kudos...".into();
                } else if !self.feed.controller().has_next_page() {
                    self.status_message = "No more kudos to load.".into();
                }
            }
            KeyCode::Char('r') => {
                if self.feed.controller().phase() == Phase::Error {
                    self.feed.retry();
                } else {
                    self.reset_view();
                    self.feed.load_first_page();
                }
                self.status_message = "Refreshing feed...".into();
            }
            KeyCode::Char('h') | KeyCode::Left => self.with_carousel(Carousel::prev),
            KeyCode::Char('l') | KeyCode::Right => self.with_carousel(Carousel::next),
            KeyCode::Enter => self.with_carousel(Carousel::toggle_expanded),
            KeyCode::Char('o') => self.open_current_image(),
            KeyCode::Char('s') => match &self.session {
                Some(session) => {
                    self.status_message = format!(
                        "Signed in as {}.",
                        session.user.name.as_deref().unwrap_or("an anonymous elf")
                    )
                }
                None if self.sign_in.providers().is_empty() => {
                    self.status_message = "No sign-in providers are configured.".into()
                }
                None => self.sign_in.open(),
            },
            _ => {}
        }
        false
    }

    fn handle_sign_in_key(&mut self, code: KeyCode) {
        match code {
            KeyCode::Esc | KeyCode::Char('q') => self.sign_in.close(),
            KeyCode::Char('j') | KeyCode::Down => self.sign_in.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.sign_in.move_selection(-1),
            KeyCode::Enter => {
                let Some(info) = self.sign_in.begin().cloned() else {
                    return;
                };
                self.status_message = match webbrowser::open(&info.signin_url) {
                    Ok(_) => format!(
                        "Opened {} sign-in in your browser. Save the session cookie with --set-token and restart.",
                        info.provider.display_name()
                    ),
                    Err(err) => {
                        log::warn!("ui: failed to open browser: {err}");
                        format!("Open {} to sign in.", info.signin_url)
                    }
                };
                self.sign_in.finish();
                self.sign_in.close();
            }
            _ => {}
        }
    }

    fn select_scope_at(&mut self, index: usize) {
        match self.feed.controller().available_scopes().get(index).copied() {
            Some(scope) => self.select_scope(scope),
            None => {
                self.status_message = "Sign in to see department and domain-specific feeds.".into()
            }
        }
    }

    fn select_scope(&mut self, scope: Scope) {
        match self.feed.select_scope(scope) {
            Ok(()) => {
                self.reset_view();
                self.status_message = format!("Loading {}...", scope.display_name());
            }
            Err(err) => self.status_message = capitalize(&err.to_string()),
        }
    }

    fn reset_view(&mut self) {
        self.selected = 0;
        self.scroll.set(0);
        self.carousels.clear();
    }

    fn move_selection(&mut self, delta: i32) {
        let count = self.feed.controller().item_count();
        if count == 0 {
            return;
        }
        let next = (self.selected as i64 + i64::from(delta)).clamp(0, count as i64 - 1);
        self.selected = next as usize;
    }

    fn selected_record(&self) -> Option<&KudosRecord> {
        self.feed.controller().items().nth(self.selected)
    }

    /// Carousel of the selected card while its images are expanded; digit
    /// keys pick an image instead of a scope then.
    fn expanded_carousel(&self) -> Option<&Carousel> {
        let record = self.selected_record()?;
        self.carousels
            .get(&record.id)
            .filter(|carousel| carousel.is_expanded())
    }

    fn with_carousel(&mut self, action: impl FnOnce(&mut Carousel)) {
        let Some(record) = self.selected_record() else {
            return;
        };
        let id = record.id.clone();
        let len = record.image_urls().len();
        if len == 0 {
            return;
        }
        action(self.carousels.entry(id).or_insert_with(|| Carousel::new(len)));
    }

    fn open_current_image(&mut self) {
        let Some(record) = self.selected_record() else {
            return;
        };
        let urls = record.image_urls();
        let index = self
            .carousels
            .get(&record.id)
            .map(Carousel::index)
            .unwrap_or(0);
        let Some(original) = urls.get(index) else {
            self.status_message = "This kudos has no images.".into();
            return;
        };
        let url = images::absolute_proxy_url(&self.site_url, original);
        self.status_message = match webbrowser::open(&url) {
            Ok(_) => format!("Opened {url}"),
            Err(err) => format!("Failed to open {url}: {err}"),
        };
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(1),
            ])
            .split(full);

        frame.render_widget(Paragraph::new(self.header_line()), layout[0]);

        let notice = Paragraph::new(self.notice_text()).style(
            Style::default()
                .fg(COLOR_TEXT_SECONDARY)
                .bg(COLOR_PANEL_BG)
                .add_modifier(Modifier::ITALIC),
        );
        frame.render_widget(notice, layout[1]);

        self.draw_feed(frame, layout[2]);

        let status_text = if self.feed.controller().is_in_flight() {
            format!("{} {}", self.spinner.frame(), self.status_message)
        } else {
            self.status_message.clone()
        };
        let footer = Paragraph::new(status_text)
            .style(Style::default().fg(COLOR_TEXT_SECONDARY).bg(COLOR_PANEL_BG))
            .alignment(Alignment::Center);
        frame.render_widget(footer, layout[3]);

        if self.sign_in.is_open() {
            self.draw_sign_in(frame, layout[2]);
        }
    }

    fn header_line(&self) -> Line<'static> {
        let controller = self.feed.controller();
        let current = controller.effective_scope();
        let bar = Style::default().bg(COLOR_PANEL_FOCUSED_BG);
        let mut spans = vec![Span::styled(
            " Kudos ",
            bar.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD),
        )];
        for (index, scope) in controller.available_scopes().iter().enumerate() {
            let label = format!(" {} {} ", index + 1, scope.display_name());
            let style = if *scope == current {
                Style::default()
                    .fg(COLOR_TEXT_DARK)
                    .bg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD)
            } else {
                bar.fg(COLOR_TEXT_PRIMARY)
            };
            spans.push(Span::styled(label, style));
            spans.push(Span::styled(" ", bar));
        }
        let viewer = match &self.session {
            Some(session) => {
                let mut label = session
                    .user
                    .name
                    .clone()
                    .unwrap_or_else(|| "signed in".to_string());
                if session.user.admin_level.can_manage_departments() {
                    label.push_str(" · admin");
                }
                label
            }
            None => "anonymous · s to sign in".to_string(),
        };
        spans.push(Span::styled(
            format!(" {viewer} "),
            bar.fg(COLOR_TEXT_SECONDARY),
        ));
        Line::from(spans)
    }

    fn notice_text(&self) -> String {
        let controller = self.feed.controller();
        if !controller.is_authenticated() {
            return "Showing all kudos. Sign in to see department and domain-specific feeds."
                .to_string();
        }
        match controller.default_notice() {
            Some(scope) => format!(
                "Showing {} feed by default. {}",
                scope.as_str(),
                scope.description()
            ),
            None => controller.effective_scope().description().to_string(),
        }
    }

    fn draw_feed(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                self.feed.controller().effective_scope().display_name(),
                Style::default()
                    .fg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG))
            .padding(Padding::horizontal(1));
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.view_height.set(inner.height);

        let controller = self.feed.controller();
        if controller.is_loading_first() {
            self.sentinel_row.set(None);
            let loading = Paragraph::new(format!("{} Loading kudos...", self.spinner.frame()))
                .style(Style::default().fg(COLOR_ACCENT))
                .alignment(Alignment::Center);
            frame.render_widget(loading, inner);
            return;
        }
        if controller.phase() == Phase::Error && controller.item_count() == 0 {
            self.sentinel_row.set(None);
            let message = controller.error().unwrap_or("unknown error").to_string();
            let text = Text::from(vec![
                Line::from(Span::styled(
                    "Failed to load kudos feed",
                    Style::default()
                        .fg(COLOR_ERROR)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(message, Style::default().fg(COLOR_TEXT_SECONDARY))),
                Line::from(""),
                Line::from(Span::styled(
                    "Press r to try again.",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]);
            frame.render_widget(
                Paragraph::new(text)
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true }),
                inner,
            );
            return;
        }
        if controller.is_empty() {
            self.sentinel_row.set(None);
            let text = Text::from(vec![
                Line::from(Span::styled(
                    "No kudos yet",
                    Style::default()
                        .fg(COLOR_TEXT_PRIMARY)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    "Be the first to share some appreciation!",
                    Style::default().fg(COLOR_TEXT_SECONDARY),
                )),
            ]);
            frame.render_widget(Paragraph::new(text).alignment(Alignment::Center), inner);
            return;
        }

        let width = inner.width.max(1);
        let now = Utc::now();
        let mut lines: Vec<Line<'static>> = Vec::new();
        let mut selected_span = (0usize, 0usize);
        for (index, record) in controller.items().enumerate() {
            let start = lines.len();
            let carousel = self.carousels.get(&record.id);
            let mut card = card_lines(record, carousel, self.theme, width, now);
            if index == self.selected {
                highlight(&mut card);
                selected_span = (start, start + card.len());
            }
            lines.extend(card);
            lines.push(Line::from(""));
        }

        let sentinel = if controller.is_loading_next() {
            Some(Line::from(Span::styled(
                format!("{} Loading more kudos...", self.spinner.frame()),
                Style::default().fg(COLOR_ACCENT),
            )))
        } else if controller.phase() == Phase::Error {
            Some(Line::from(Span::styled(
                format!(
                    "Failed to load more kudos: {} (r to retry)",
                    controller.error().unwrap_or("unknown error")
                ),
                Style::default().fg(COLOR_ERROR),
            )))
        } else if controller.has_next_page() {
            Some(Line::from(Span::styled(
                "Load more kudos (m)",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )))
        } else {
            None
        };
        let sentinel_row = sentinel.map(|line| {
            lines.push(line.alignment(Alignment::Center));
            lines.len() - 1
        });
        self.sentinel_row
            .set(sentinel_row.filter(|_| controller.phase() != Phase::Error));

        let height = inner.height as usize;
        let last_selected = self.selected + 1 == controller.item_count();
        let view_end = if last_selected {
            lines.len()
        } else {
            selected_span.1
        };
        let mut scroll = self.scroll.get();
        if selected_span.0 < scroll {
            scroll = selected_span.0;
        }
        if view_end > scroll + height {
            scroll = view_end.saturating_sub(height).min(selected_span.0);
        }
        scroll = scroll.min(lines.len().saturating_sub(1));
        self.scroll.set(scroll);

        let visible: Vec<Line<'static>> = lines.into_iter().skip(scroll).take(height).collect();
        frame.render_widget(Paragraph::new(Text::from(visible)), inner);
    }

    fn draw_sign_in(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup_area = centered_rect(50, 50, area);
        frame.render_widget(Clear, popup_area);

        let mut lines = vec![
            Line::from(Span::styled(
                "Choose how you'd like to sign in",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            )),
            Line::from(""),
        ];
        for (index, info) in self.sign_in.providers().iter().enumerate() {
            let loading = self.sign_in.loading() == Some(info.provider);
            let label = if loading {
                format!("  Signing in with {}...", info.provider.display_name())
            } else {
                format!("  Continue with {}", info.provider.display_name())
            };
            let style = if self.sign_in.is_disabled() && !loading {
                Style::default().fg(COLOR_BORDER_IDLE)
            } else if index == self.sign_in.selected() {
                Style::default()
                    .fg(COLOR_TEXT_DARK)
                    .bg(COLOR_SUCCESS)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(COLOR_TEXT_PRIMARY)
            };
            lines.push(Line::from(Span::styled(label, style)));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("j/k move · Enter open · Esc close · config: {}", self.config_path),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )));

        let popup = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .title(Span::styled(
                        "Sign in to Kudos",
                        Style::default()
                            .fg(COLOR_ACCENT)
                            .add_modifier(Modifier::BOLD),
                    ))
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(COLOR_ACCENT))
                    .style(Style::default().bg(COLOR_PANEL_BG)),
            )
            .wrap(Wrap { trim: false });
        frame.render_widget(popup, popup_area);
    }
}

fn card_lines(
    record: &KudosRecord,
    carousel: Option<&Carousel>,
    theme: Theme,
    width: u16,
    now: DateTime<Utc>,
) -> Vec<Line<'static>> {
    let identity = ANONYMIZER.anonymize(&record.user.id);
    let author = format!(" {} {} ", identity.avatar, identity.name);
    let when = relative_time(record.created_at, now);
    let gap = (width as usize)
        .saturating_sub(UnicodeWidthStr::width(author.as_str()) + UnicodeWidthStr::width(when.as_str()))
        .max(1);

    let mut lines = vec![Line::from(vec![
        Span::styled(author, theme.identity_style(&identity)),
        Span::raw(" ".repeat(gap)),
        Span::styled(when, Style::default().fg(COLOR_TEXT_SECONDARY)),
    ])];

    if let Some(owner) = record.gift_owner_id() {
        let owner = ANONYMIZER.anonymize(owner);
        lines.push(Line::from(Span::styled(
            format!("🎁 Thanking {} for a gift", owner.name),
            Style::default().fg(COLOR_SUCCESS),
        )));
    }

    let wrap_width = (width as usize).max(8);
    for paragraph in record.message.lines() {
        if paragraph.trim().is_empty() {
            lines.push(Line::from(""));
            continue;
        }
        for piece in wrap(paragraph, WrapOptions::new(wrap_width)) {
            lines.push(Line::from(Span::styled(
                piece.into_owned(),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            )));
        }
    }

    let urls = record.image_urls();
    if !urls.is_empty() {
        let default_carousel = Carousel::new(urls.len());
        let carousel = carousel.unwrap_or(&default_carousel);
        let counter = carousel.counter();
        let style = Style::default().fg(COLOR_ACCENT);
        if carousel.is_expanded() {
            for (index, url) in urls.iter().enumerate() {
                let marker = if index == carousel.index() { "▸" } else { " " };
                lines.push(Line::from(Span::styled(
                    format!("{marker} 🖼 {}", images::proxy_image_url(url)),
                    style,
                )));
            }
        } else if let Some(url) = urls.get(carousel.index()) {
            let label = if counter.is_empty() {
                format!("🖼 {}", images::proxy_image_url(url))
            } else {
                format!("🖼 {counter} {}", images::proxy_image_url(url))
            };
            lines.push(Line::from(Span::styled(label, style)));
        }
    }

    lines
}

fn highlight(lines: &mut [Line<'static>]) {
    for line in lines.iter_mut() {
        line.spans.insert(
            0,
            Span::styled("▌", Style::default().fg(COLOR_ACCENT)),
        );
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Distance between `then` and `now` in words, e.g. "about 2 hours ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    let distance = distance_in_words(seconds.unsigned_abs());
    if seconds < 0 {
        format!("in {distance}")
    } else {
        format!("{distance} ago")
    }
}

fn distance_in_words(seconds: u64) -> String {
    const MINUTES_IN_DAY: u64 = 1440;
    const MINUTES_IN_MONTH: u64 = 43_200;
    const MINUTES_IN_TWO_MONTHS: u64 = 86_400;

    let minutes = (seconds + 30) / 60;
    let plural = |count: u64, unit: &str| {
        if count == 1 {
            format!("1 {unit}")
        } else {
            format!("{count} {unit}s")
        }
    };

    if minutes < 1 {
        "less than a minute".to_string()
    } else if minutes < 45 {
        plural(minutes, "minute")
    } else if minutes < 90 {
        "about 1 hour".to_string()
    } else if minutes < MINUTES_IN_DAY {
        format!("about {}", plural((minutes + 30) / 60, "hour"))
    } else if minutes < 2520 {
        "1 day".to_string()
    } else if minutes < MINUTES_IN_MONTH {
        plural((minutes + MINUTES_IN_DAY / 2) / MINUTES_IN_DAY, "day")
    } else if minutes < MINUTES_IN_TWO_MONTHS {
        format!(
            "about {}",
            plural((minutes + MINUTES_IN_MONTH / 2) / MINUTES_IN_MONTH, "month")
        )
    } else {
        let months = minutes / MINUTES_IN_MONTH;
        if months < 12 {
            return plural(months.max(2), "month");
        }
        let years = months / 12;
        match months % 12 {
            0..=2 => format!("about {}", plural(years, "year")),
            3..=8 => format!("over {}", plural(years, "year")),
            _ => format!("almost {}", plural(years + 1, "year")),
        }
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let percent_x = percent_x.min(100);
    let percent_y = percent_y.min(100);
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage(100 - percent_x - (100 - percent_x) / 2),
        ])
        .split(area);
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage(100 - percent_y - (100 - percent_y) / 2),
        ])
        .split(horizontal[1]);
    vertical[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kudos::{FeedPage, FeedRequest, FetchError, Purchase, UserRef, WishlistAssignment};
    use chrono::Duration as ChronoDuration;

    struct GalleryService;

    impl FeedService for GalleryService {
        fn recommended_scope(&self) -> Result<Scope, FetchError> {
            Ok(Scope::Site)
        }

        fn load_feed(&self, _request: &FeedRequest) -> Result<FeedPage, FetchError> {
            let mut kudos = record("three pictures");
            kudos.images = Some(r#"["https://e2/b/1.png","https://e2/b/2.png","https://e2/b/3.png"]"#.into());
            Ok(FeedPage {
                items: vec![kudos],
                next_cursor: None,
            })
        }
    }

    fn loaded_model() -> Model {
        let mut model = Model::new(Options {
            feed_service: Arc::new(GalleryService),
            feed: feed::Options::default(),
            session: None,
            providers: Vec::new(),
            site_url: Url::parse("https://kudos.example/").unwrap(),
            status_message: String::new(),
            theme: "default".into(),
            config_path: "config.yaml".into(),
        });
        let deadline = Instant::now() + Duration::from_secs(5);
        while model.feed.controller().item_count() == 0 && Instant::now() < deadline {
            model.feed.poll_timeout(Duration::from_millis(50));
        }
        assert_eq!(model.feed.controller().item_count(), 1);
        model
    }

    fn image_index(model: &Model) -> usize {
        model.carousels.get("k1").map(Carousel::index).unwrap_or(0)
    }

    fn record(message: &str) -> KudosRecord {
        KudosRecord {
            id: "k1".into(),
            user: UserRef { id: "user-1".into() },
            message: message.into(),
            images: None,
            created_at: Utc::now(),
            purchase: None,
        }
    }

    fn text_of(lines: &[Line<'_>]) -> Vec<String> {
        lines
            .iter()
            .map(|line| line.spans.iter().map(|span| span.content.as_ref()).collect())
            .collect()
    }

    #[test]
    fn relative_time_reads_like_words() {
        let now = Utc::now();
        let ago = |seconds: i64| relative_time(now - ChronoDuration::seconds(seconds), now);
        assert_eq!(ago(10), "less than a minute ago");
        assert_eq!(ago(60), "1 minute ago");
        assert_eq!(ago(5 * 60), "5 minutes ago");
        assert_eq!(ago(60 * 60), "about 1 hour ago");
        assert_eq!(ago(3 * 3600), "about 3 hours ago");
        assert_eq!(ago(30 * 3600), "1 day ago");
        assert_eq!(ago(5 * 86_400), "5 days ago");
        assert_eq!(ago(40 * 86_400), "about 1 month ago");
        assert_eq!(ago(200 * 86_400), "6 months ago");
        assert_eq!(ago(400 * 86_400), "about 1 year ago");
        assert_eq!(relative_time(now + ChronoDuration::minutes(3), now), "in 3 minutes");
    }

    #[test]
    fn card_shows_identity_and_gift_line() {
        let mut kudos = record("Thanks for the scarf!");
        kudos.purchase = Some(Purchase {
            wishlist_assignment: WishlistAssignment {
                wishlist_owner: UserRef { id: "hello".into() },
            },
        });
        let lines = text_of(&card_lines(&kudos, None, Theme::Default, 60, Utc::now()));
        assert!(lines[0].contains("🦌 Candy Mint"));
        assert_eq!(lines[1], "🎁 Thanking Gift Wrap for a gift");
        assert_eq!(lines[2], "Thanks for the scarf!");
    }

    #[test]
    fn card_uses_proxy_url_and_counter() {
        let mut kudos = record("pics");
        kudos.images = Some(
            r#"["https://e2.example/kudos-images/a.png","https://e2.example/kudos-images/b.png"]"#
                .into(),
        );
        let mut carousel = Carousel::new(2);
        carousel.next();
        let lines = text_of(&card_lines(&kudos, Some(&carousel), Theme::Mono, 60, Utc::now()));
        assert_eq!(lines.last().unwrap(), "🖼 2/2 /api/images/b.png");
    }

    #[test]
    fn digits_pick_image_only_while_expanded() {
        let mut model = loaded_model();

        // collapsed: '3' is a scope key, and anonymous viewers only have one
        assert!(!model.handle_key(KeyCode::Char('3')));
        assert_eq!(image_index(&model), 0);
        assert!(model.status_message.starts_with("Sign in"));

        model.handle_key(KeyCode::Enter);
        assert!(model.expanded_carousel().is_some());
        model.handle_key(KeyCode::Char('3'));
        assert_eq!(image_index(&model), 2);
        model.handle_key(KeyCode::Char('9'));
        assert_eq!(image_index(&model), 2);
        model.handle_key(KeyCode::Char('1'));
        assert_eq!(image_index(&model), 0);

        model.handle_key(KeyCode::Enter);
        assert!(model.expanded_carousel().is_none());
    }

    #[test]
    fn swatches_cover_palette() {
        for class in crate::anonymize::CHRISTMAS_COLORS {
            if class != "bg-slate-200" {
                assert_ne!(swatch(class), Color::Rgb(226, 232, 240), "{class}");
            }
        }
        assert_eq!(Theme::from_name("Mono"), Theme::Mono);
        assert_eq!(Theme::from_name("default"), Theme::Default);
    }
}

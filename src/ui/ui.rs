use image::DynamicImage;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use ratatui_image::{picker::Picker, protocol::StatefulProtocol, Resize, StatefulImage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use crate::backend::download::{DownloadOrchestrator, DownloadProgress};
use crate::backend::mangadex::{Chapter, Manga};
use crate::backend::registry::{ChapterRegistry, PageSlot};
use crate::backend::selection::SelectionSet;

const MAX_DESC_LENGTH: usize = 200;
const COVER_WIDTH: u16 = 22;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum View {
    #[default]
    Search,
    Card,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum Focus {
    #[default]
    Input,
    Results,
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
}

/// Everything shown for one opened manga. Kept for the whole session so
/// chapter selections survive closing and reopening the card.
pub struct CardState {
    pub manga: Manga,
    pub registry: ChapterRegistry,
    pub selection: SelectionSet,
    pub cursor: ListState,
    pub orchestrator: Arc<DownloadOrchestrator>,
    pub progress: watch::Receiver<DownloadProgress>,
    pub status: Option<String>,
    pub expanded: bool,
}

impl CardState {
    pub fn new(manga: Manga, orchestrator: Arc<DownloadOrchestrator>) -> Self {
        let progress = orchestrator.subscribe();
        Self {
            manga,
            registry: ChapterRegistry::new(),
            selection: SelectionSet::new(),
            cursor: ListState::default(),
            orchestrator,
            progress,
            status: None,
            expanded: false,
        }
    }

    pub fn highlighted_chapter(&self) -> Option<&Chapter> {
        self.cursor
            .selected()
            .and_then(|i| self.registry.chapters().get(i))
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let len = self.registry.chapters().len();
        if len == 0 {
            self.cursor.select(None);
            return;
        }
        let current = self.cursor.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.cursor.select(Some(next as usize));
    }
}

pub struct App {
    pub state: AppState,
    pub loading_message: String,
    pub view: View,
    pub focus: Focus,
    pub search_query: String,
    pub last_search_query: String,
    pub search_debounce: Option<Instant>,
    pub searching: bool,
    pub search_results: Vec<Manga>,
    pub popular_now: Vec<Manga>,
    pub results_state: ListState,
    pub cards: HashMap<String, CardState>,
    pub open_card: Option<String>,
    pub picker: Option<Picker>,
    pub image_states: HashMap<String, StatefulProtocol>,
    pub status_message: Option<String>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            view: View::Search,
            focus: Focus::Input,
            search_query: String::new(),
            last_search_query: String::new(),
            search_debounce: None,
            searching: false,
            search_results: Vec::new(),
            popular_now: Vec::new(),
            results_state: ListState::default(),
            cards: HashMap::new(),
            open_card: None,
            picker,
            image_states: HashMap::new(),
            status_message: None,
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_ready(&mut self) {
        self.state = AppState::Ready;
    }

    pub fn add_cover_image(&mut self, manga_id: &str, image: DynamicImage) {
        if let Some(ref picker) = self.picker {
            let protocol = picker.new_resize_protocol(image);
            self.image_states.insert(manga_id.to_string(), protocol);
        }
    }

    /// Search results once a query has been entered, popular titles before.
    pub fn visible_results(&self) -> &[Manga] {
        if self.search_query.is_empty() {
            &self.popular_now
        } else {
            &self.search_results
        }
    }

    pub fn highlighted_manga(&self) -> Option<&Manga> {
        self.results_state
            .selected()
            .and_then(|i| self.visible_results().get(i))
    }

    pub fn move_result_cursor(&mut self, delta: isize) {
        let len = self.visible_results().len();
        if len == 0 {
            self.results_state.select(None);
            return;
        }
        let current = self.results_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.results_state.select(Some(next as usize));
    }

    /// Shows the card for `manga`, creating it with a fresh orchestrator on
    /// first open. Returns true when the card is new.
    pub fn open_manga(
        &mut self,
        manga: Manga,
        orchestrator: impl FnOnce() -> Arc<DownloadOrchestrator>,
    ) -> bool {
        let id = manga.id.clone();
        let created = !self.cards.contains_key(&id);
        if created {
            self.cards
                .insert(id.clone(), CardState::new(manga, orchestrator()));
        }
        self.open_card = Some(id);
        self.view = View::Card;
        created
    }

    pub fn close_card(&mut self) {
        self.view = View::Search;
        self.focus = Focus::Results;
    }

    pub fn card_mut(&mut self) -> Option<&mut CardState> {
        self.open_card.as_ref().and_then(|id| self.cards.get_mut(id))
    }
}

pub fn ui(f: &mut Frame, app: &mut App) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Ready => match app.view {
            View::Search => draw_search_view(f, app),
            View::Card => draw_card_view(f, app),
        },
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Manga Zip")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let frame_idx = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        / 100) as usize
        % spinner_frames.len();

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner_frames[frame_idx]),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        ),
    ]);

    let loading_paragraph = Paragraph::new(loading_text).alignment(Alignment::Center);
    f.render_widget(loading_paragraph, center_layout[1]);

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn focused_style(focused: bool) -> Style {
    if focused {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

fn draw_search_view(f: &mut Frame, app: &mut App) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // search input
            Constraint::Min(5),    // results
            Constraint::Length(3), // footer
        ])
        .split(f.area());

    let mut input = vec![Span::raw(app.search_query.clone())];
    if app.focus == Focus::Input {
        input.push(Span::styled("▏", Style::default().fg(Color::Yellow)));
    }
    if app.searching {
        input.push(Span::styled("  searching...", Style::default().fg(Color::DarkGray)));
    }
    let search = Paragraph::new(Line::from(input)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Search for a manga!")
            .border_style(focused_style(app.focus == Focus::Input)),
    );
    f.render_widget(search, root[0]);

    let title = if app.search_query.is_empty() {
        "Popular Now".to_string()
    } else {
        format!("{} Search results", app.search_results.len())
    };
    let items: Vec<ListItem> = app
        .visible_results()
        .iter()
        .map(|manga| {
            let creators = if manga.artist.is_empty() || manga.artist == manga.author {
                manga.author.clone()
            } else {
                format!("{}, {}", manga.author, manga.artist)
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    manga.title.clone(),
                    Style::default()
                        .fg(Color::White)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!("  {}  ★ {}", creators, manga.status),
                    Style::default().fg(Color::DarkGray),
                ),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(focused_style(app.focus == Focus::Results)),
        )
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Rgb(255, 103, 64)))
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, root[1], &mut app.results_state);

    draw_footer(
        f,
        root[2],
        app.status_message.as_deref(),
        &[
            ("Tab", "switch focus"),
            ("↑/↓", "move"),
            ("Enter", "open"),
            ("Ctrl-C", "quit"),
        ],
    );
}

fn draw_card_view(f: &mut Frame, app: &mut App) {
    let App {
        cards,
        open_card,
        image_states,
        ..
    } = app;
    let Some(card) = open_card.as_ref().and_then(|id| cards.get_mut(id)) else {
        return;
    };

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(10), // cover and description
            Constraint::Length(1),  // selection / progress
            Constraint::Min(5),     // chapters
            Constraint::Length(1),  // page navigator
            Constraint::Length(3),  // footer
        ])
        .split(f.area());

    draw_card_header(f, root[0], card, image_states.get_mut(&card.manga.id));
    draw_selection_bar(f, root[1], card);
    draw_chapter_list(f, root[2], card);
    draw_navigator(f, root[3], &card.registry);

    draw_footer(
        f,
        root[4],
        card.status.as_deref(),
        &[
            ("Space", "select"),
            ("a", "select all"),
            ("←/→", "page"),
            ("d", "download"),
            ("r", "reload"),
            ("e", "description"),
            ("Esc", "back"),
        ],
    );
}

fn draw_card_header(
    f: &mut Frame,
    area: Rect,
    card: &CardState,
    image_state: Option<&mut StatefulProtocol>,
) {
    let layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(COVER_WIDTH), Constraint::Min(10)])
        .split(area);

    if let Some(state) = image_state {
        let image_widget = StatefulImage::new().resize(Resize::Scale(None));
        f.render_stateful_widget(image_widget, layout[0], state);
    } else {
        let placeholder = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled("📚", Style::default().fg(Color::Magenta))),
        ])
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray)),
        )
        .alignment(Alignment::Center);
        f.render_widget(placeholder, layout[0]);
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(
            card.manga.title.clone(),
            Style::default()
                .fg(Color::Rgb(255, 103, 64))
                .add_modifier(Modifier::BOLD),
        ))
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(layout[1]);
    f.render_widget(block, layout[1]);

    let description = if card.expanded {
        card.manga.description.clone()
    } else {
        truncate_text(&card.manga.description, MAX_DESC_LENGTH)
    };
    let lines = wrap_text(
        &description,
        inner.width.saturating_sub(1) as usize,
        inner.height.max(1) as usize,
    );
    let paragraph = Paragraph::new(lines.join("\n")).style(Style::default().fg(Color::Gray));
    f.render_widget(paragraph, inner);
}

fn draw_selection_bar(f: &mut Frame, area: Rect, card: &CardState) {
    let progress = *card.progress.borrow();

    let mut spans = vec![Span::styled(
        format!(" {} chapters selected", card.selection.size()),
        Style::default().fg(Color::White),
    )];
    if progress.in_progress {
        spans.push(Span::styled(
            format!("   Download in progress: {}%", progress.percent()),
            Style::default()
                .fg(Color::Rgb(255, 103, 64))
                .add_modifier(Modifier::BOLD),
        ));
    }
    let select_all = if card.selection.all_selected(card.registry.chapters()) {
        "Deselect all"
    } else {
        "Select all"
    };
    spans.push(Span::styled(
        format!("   [a] {}", select_all),
        Style::default().fg(Color::Blue),
    ));

    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_chapter_list(f: &mut Frame, area: Rect, card: &mut CardState) {
    let title = if card.registry.is_loading() {
        "Chapters (loading...)".to_string()
    } else {
        format!("Chapters ({} total)", card.registry.total())
    };

    let items: Vec<ListItem> = card
        .registry
        .chapters()
        .iter()
        .map(|chapter| {
            let selected = card.selection.has(&chapter.id);
            let style = if selected {
                Style::default().fg(Color::Black).bg(Color::Green)
            } else {
                Style::default().fg(Color::White)
            };
            let title = chapter
                .title
                .as_deref()
                .unwrap_or("No chapter title available");
            ListItem::new(Line::from(vec![
                Span::raw(if selected { "[x] " } else { "[ ] " }),
                Span::raw(format!("Ch. {:<8}", format!("{}:", chapter.chapter))),
                Span::raw(title.to_string()),
                Span::styled(
                    format!("  {}", chapter_details(chapter)),
                    Style::default().add_modifier(Modifier::DIM),
                ),
            ]))
            .style(style)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .highlight_symbol("▶ ");
    f.render_stateful_widget(list, area, &mut card.cursor);
}

/// Volume and page count shown after a chapter's title.
fn chapter_details(chapter: &Chapter) -> String {
    match chapter.volume.as_deref() {
        Some(volume) => format!("Vol. {} | {} pages", volume, chapter.pages),
        None => format!("{} pages", chapter.pages),
    }
}

fn draw_navigator(f: &mut Frame, area: Rect, registry: &ChapterRegistry) {
    let spans: Vec<Span> = registry
        .navigator()
        .into_iter()
        .map(|slot| match slot {
            PageSlot::Prev { enabled } => Span::styled(
                " ← ",
                Style::default().fg(if enabled { Color::White } else { Color::DarkGray }),
            ),
            PageSlot::Next { enabled } => Span::styled(
                " → ",
                Style::default().fg(if enabled { Color::White } else { Color::DarkGray }),
            ),
            PageSlot::Gap => Span::raw(" … "),
            PageSlot::Page { index, active } => {
                let style = if active {
                    Style::default().fg(Color::Black).bg(Color::Rgb(255, 103, 64))
                } else {
                    Style::default().fg(Color::White)
                };
                Span::styled(format!(" {} ", index + 1), style)
            }
        })
        .collect();

    f.render_widget(
        Paragraph::new(Line::from(spans)).alignment(Alignment::Center),
        area,
    );
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
                .trim_end()
        )
    }
}

fn wrap_text(text: &str, width: usize, max_lines: usize) -> Vec<String> {
    if width == 0 || max_lines == 0 {
        return vec![];
    }

    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.chars().count() + 1 + word.chars().count() <= width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            if lines.len() >= max_lines {
                if let Some(last) = lines.last_mut() {
                    let char_count = last.chars().count();
                    if char_count > 3 {
                        *last = last.chars().take(char_count - 3).collect::<String>() + "...";
                    }
                }
                return lines;
            }
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() && lines.len() < max_lines {
        lines.push(current_line);
    }

    lines
}

fn draw_footer(f: &mut Frame, area: Rect, status: Option<&str>, keys: &[(&str, &str)]) {
    let line = match status {
        Some(status) => Line::from(Span::styled(
            status.to_string(),
            Style::default().fg(Color::Yellow),
        )),
        None => {
            let mut spans = Vec::new();
            for (key, action) in keys {
                spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
                spans.push(Span::raw(format!(": {}  ", action)));
            }
            Line::from(spans)
        }
    };

    let p = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_text("short", 200), "short");
    }

    #[test]
    fn truncate_long_text_to_limit() {
        let text = "word ".repeat(60);
        let truncated = truncate_text(&text, MAX_DESC_LENGTH);
        assert!(truncated.chars().count() <= MAX_DESC_LENGTH);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn wrap_marks_overflow() {
        let lines = wrap_text("one two three four five six", 9, 2);
        assert_eq!(lines, vec!["one two", "th..."]);
    }

    #[test]
    fn chapter_details_show_volume_when_known() {
        let mut chapter = Chapter {
            id: "c-1".to_string(),
            chapter: "1".to_string(),
            title: None,
            volume: Some("3".to_string()),
            pages: 18,
        };
        assert_eq!(chapter_details(&chapter), "Vol. 3 | 18 pages");

        chapter.volume = None;
        assert_eq!(chapter_details(&chapter), "18 pages");
    }
}

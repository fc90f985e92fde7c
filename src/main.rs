mod backend;
mod config;
mod error;
mod ui;

use backend::download::{DirectorySink, DownloadOrchestrator, RunOutcome};
use backend::mangadex::{ChapterPage, Manga, MangaDexClient};
use backend::registry;
use backend::selection::SelectionEntry;
use config::Config;
use image::DynamicImage;
use ui::ui::{App, Focus, View, ui};

use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use log::{error, info, warn};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{error::Error, io, sync::Arc, time::Duration};
use tokio::sync::mpsc;

enum BackgroundTask {
    CoverLoaded {
        manga_id: String,
        image: DynamicImage,
    },
    SearchResults {
        query: String,
        results: Result<Vec<Manga>, String>,
    },
    ChaptersLoaded {
        manga_id: String,
        page_index: usize,
        result: Result<ChapterPage, String>,
    },
    DownloadFinished {
        manga_id: String,
        result: Result<RunOutcome, String>,
    },
}

/// Shared handles the input handlers need to start background work.
struct Services {
    client: Arc<MangaDexClient>,
    config: Config,
    task_tx: mpsc::UnboundedSender<BackgroundTask>,
}

impl Services {
    fn new_orchestrator(&self) -> Arc<DownloadOrchestrator> {
        Arc::new(DownloadOrchestrator::new(
            self.client.clone(),
            Arc::new(DirectorySink::new(self.config.download_dir.clone())),
            self.config.compression,
        ))
    }
}

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    // stderr belongs to the terminal UI
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config::log_path())
    {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(_) => {
            builder.filter_level(log::LevelFilter::Off);
        }
    }
    builder.init();
}

fn load_config() -> Config {
    let path = config::config_path();
    match Config::load_from(&path) {
        Ok(config) => {
            if !path.exists() {
                if let Err(e) = config.save_to(&path) {
                    warn!("could not write default config: {}", e);
                }
            }
            config
        }
        Err(e) => {
            warn!("{}; using defaults", e);
            Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let config = load_config();
    let client = Arc::new(MangaDexClient::new(&config)?);
    info!(
        "starting, archives go to {}",
        config.download_dir.display()
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();

    let (task_tx, mut task_rx) = mpsc::unbounded_channel::<BackgroundTask>();

    app.set_loading("Fetching popular manga...");
    terminal.draw(|f| ui(f, &mut app))?;

    app.popular_now = match client.get_popular_now().await {
        Ok(mangas) => mangas,
        Err(e) => {
            error!("failed to load popular manga: {}", e);
            app.status_message = Some(format!("Could not reach MangaDex: {}", e));
            Vec::new()
        }
    };
    app.move_result_cursor(0);
    app.set_ready();

    let services = Services {
        client,
        config,
        task_tx,
    };
    let res = run_app(&mut terminal, &mut app, &mut task_rx, &services).await;

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

fn spawn_cover_loader(manga: &Manga, services: &Services) {
    let client = services.client.clone();
    let manga_id = manga.id.clone();
    let cover_url = manga.cover_url.clone();
    let tx = services.task_tx.clone();

    tokio::spawn(async move {
        if let Some(image) = client.fetch_cover_image(&cover_url).await {
            let _ = tx.send(BackgroundTask::CoverLoaded { manga_id, image });
        }
    });
}

fn spawn_search(query: String, services: &Services) {
    let client = services.client.clone();
    let tx = services.task_tx.clone();

    tokio::spawn(async move {
        let results = client.search_manga(&query).await.map_err(|e| e.to_string());
        let _ = tx.send(BackgroundTask::SearchResults { query, results });
    });
}

fn spawn_chapters_loader(manga_id: String, page_index: usize, services: &Services) {
    let client = services.client.clone();
    let tx = services.task_tx.clone();

    tokio::spawn(async move {
        let result = registry::load_page(client.as_ref(), &manga_id, page_index)
            .await
            .map_err(|e| e.to_string());
        let _ = tx.send(BackgroundTask::ChaptersLoaded {
            manga_id,
            page_index,
            result,
        });
    });
}

fn spawn_download(
    orchestrator: Arc<DownloadOrchestrator>,
    manga_id: String,
    selection: Vec<SelectionEntry>,
    title: String,
    services: &Services,
) {
    let tx = services.task_tx.clone();

    tokio::spawn(async move {
        let result = orchestrator
            .run(selection, &title)
            .await
            .map_err(|e| e.to_string());
        let _ = tx.send(BackgroundTask::DownloadFinished { manga_id, result });
    });
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    task_rx: &mut mpsc::UnboundedReceiver<BackgroundTask>,
    services: &Services,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();
    let debounce = Duration::from_millis(services.config.search_debounce_ms);

    loop {
        terminal.draw(|f| ui(f, app))?;

        // Check if we need to trigger a debounced search
        if let Some(debounce_time) = app.search_debounce {
            if debounce_time.elapsed() >= debounce {
                app.search_debounce = None;
                start_search(app, services);
            }
        }

        tokio::select! {
            // Redraw tick: debounce timer and download progress
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                if let Event::Key(key) = event
                    && key.kind == KeyEventKind::Press
                {
                    if wants_quit(app, key) {
                        return Ok(());
                    }
                    match app.view {
                        View::Search => handle_search_input(app, key.code, services),
                        View::Card => handle_card_input(app, key.code, services),
                    }
                }
            }

            Some(task) = task_rx.recv() => handle_task(app, task),
        }
    }
}

fn wants_quit(app: &App, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }
    // 'q' is a search character while typing
    key.code == KeyCode::Char('q') && !(app.view == View::Search && app.focus == Focus::Input)
}

fn handle_task(app: &mut App, task: BackgroundTask) {
    match task {
        BackgroundTask::CoverLoaded { manga_id, image } => {
            app.add_cover_image(&manga_id, image);
        }
        BackgroundTask::SearchResults { query, results } => {
            app.searching = false;
            if query != app.search_query {
                // the user kept typing while this search ran
                if !app.search_query.is_empty() {
                    app.search_debounce = Some(std::time::Instant::now());
                }
                return;
            }
            match results {
                Ok(results) => {
                    app.search_results = results;
                    app.status_message = None;
                }
                Err(e) => {
                    app.search_results.clear();
                    app.status_message = Some(format!("Search failed: {}", e));
                }
            }
            app.results_state.select(None);
            app.move_result_cursor(0);
        }
        BackgroundTask::ChaptersLoaded {
            manga_id,
            page_index,
            result,
        } => {
            let Some(card) = app.cards.get_mut(&manga_id) else {
                return;
            };
            match result {
                Ok(page) => {
                    if card.registry.apply(page_index, page) {
                        card.cursor.select(None);
                        card.move_cursor(0);
                    }
                }
                Err(e) => {
                    card.registry.fail(page_index);
                    card.status = Some(format!("Failed to load chapters: {}", e));
                }
            }
        }
        BackgroundTask::DownloadFinished { manga_id, result } => {
            let Some(card) = app.cards.get_mut(&manga_id) else {
                return;
            };
            match result {
                Ok(RunOutcome::Delivered(path)) => {
                    card.status = Some(format!("Saved {}", path.display()));
                }
                Ok(RunOutcome::Skipped) => {}
                Err(e) => {
                    card.status = Some(format!("Download failed: {}", e));
                }
            }
        }
    }
}

fn start_search(app: &mut App, services: &Services) {
    if app.search_query.is_empty() || app.searching || app.search_query == app.last_search_query
    {
        return;
    }
    app.searching = true;
    app.last_search_query = app.search_query.clone();
    spawn_search(app.search_query.clone(), services);
}

fn handle_search_input(app: &mut App, key: KeyCode, services: &Services) {
    match (app.focus, key) {
        (Focus::Input, KeyCode::Char(c)) => {
            app.search_query.push(c);
            app.search_debounce = Some(std::time::Instant::now());
        }
        (Focus::Input, KeyCode::Backspace) => {
            app.search_query.pop();
            if app.search_query.is_empty() {
                app.search_results.clear();
                app.last_search_query.clear();
                app.search_debounce = None;
                app.move_result_cursor(0);
            } else {
                app.search_debounce = Some(std::time::Instant::now());
            }
        }
        (Focus::Input, KeyCode::Enter) => {
            // Immediate search on Enter
            app.search_debounce = None;
            start_search(app, services);
        }
        (Focus::Input, KeyCode::Esc) => {
            app.search_query.clear();
            app.search_results.clear();
            app.last_search_query.clear();
            app.search_debounce = None;
            app.move_result_cursor(0);
        }
        (Focus::Input, KeyCode::Tab | KeyCode::Down) => {
            app.focus = Focus::Results;
            if app.results_state.selected().is_none() {
                app.move_result_cursor(0);
            }
        }
        (Focus::Results, KeyCode::Tab | KeyCode::Esc) => {
            app.focus = Focus::Input;
        }
        (Focus::Results, KeyCode::Up) => {
            if app.results_state.selected() == Some(0) {
                app.focus = Focus::Input;
            } else {
                app.move_result_cursor(-1);
            }
        }
        (Focus::Results, KeyCode::Down) => app.move_result_cursor(1),
        (Focus::Results, KeyCode::Enter) => {
            if let Some(manga) = app.highlighted_manga().cloned() {
                open_manga(app, manga, services);
            }
        }
        _ => {}
    }
}

fn open_manga(app: &mut App, manga: Manga, services: &Services) {
    if !app.image_states.contains_key(&manga.id) {
        spawn_cover_loader(&manga, services);
    }

    let manga_id = manga.id.clone();
    if app.open_manga(manga, || services.new_orchestrator()) {
        if let Some(card) = app.card_mut() {
            if let Some(page_index) = card.registry.request_page(0) {
                spawn_chapters_loader(manga_id, page_index, services);
            }
        }
    }
}

fn handle_card_input(app: &mut App, key: KeyCode, services: &Services) {
    let Some(card) = app.card_mut() else {
        return;
    };

    match key {
        KeyCode::Esc => {
            app.close_card();
        }
        KeyCode::Up => card.move_cursor(-1),
        KeyCode::Down => card.move_cursor(1),
        KeyCode::Char(' ') | KeyCode::Enter => {
            if let Some(chapter) = card.highlighted_chapter().cloned() {
                card.selection.toggle(&chapter);
            }
        }
        KeyCode::Char('a') => {
            let chapters = card.registry.chapters().to_vec();
            card.selection.toggle_all_on_page(&chapters);
        }
        KeyCode::Char('r') => {
            let current = card.registry.page();
            if let Some(page_index) = card.registry.request_page(current) {
                card.status = None;
                spawn_chapters_loader(card.manga.id.clone(), page_index, services);
            }
        }
        KeyCode::Char('e') => {
            card.expanded = !card.expanded;
        }
        KeyCode::Left | KeyCode::Right => {
            let target = if key == KeyCode::Left {
                card.registry.page().checked_sub(1)
            } else {
                Some(card.registry.page() + 1)
            };
            if let Some(page_index) = target.and_then(|p| card.registry.request_page(p)) {
                card.status = None;
                spawn_chapters_loader(card.manga.id.clone(), page_index, services);
            }
        }
        KeyCode::Char('d') => {
            if card.selection.is_empty() {
                card.status = Some("Select at least one chapter first".to_string());
                return;
            }
            if card.orchestrator.is_running() {
                return;
            }
            card.status = None;
            spawn_download(
                card.orchestrator.clone(),
                card.manga.id.clone(),
                card.selection.snapshot(),
                card.manga.title.clone(),
                services,
            );
        }
        _ => {}
    }
}

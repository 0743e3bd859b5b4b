mod app;
mod ui;

use crate::app::{App, CurrentScreen, DEFAULT_TIMEOUT_SECS};
use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{io, path::PathBuf, sync::Arc, time::Duration};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ua_tree::{NodeId, NodeSource, SnapshotSource};

/// Browse an OPC UA style namespace one level at a time.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Namespace snapshot (JSON). The built-in demo namespace is used when omitted.
    #[arg(long)]
    namespace: Option<PathBuf>,

    /// Identity of the node shown as the tree root.
    #[arg(long, default_value = "i=84")]
    root: String,

    /// Artificial delay added to every source call, in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,

    /// Timeout for a single source call, in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Directory for the daily rolling log file.
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn build_source(args: &Args) -> Result<Arc<dyn NodeSource>> {
    let source = match &args.namespace {
        Some(path) => SnapshotSource::from_path(path)
            .with_context(|| format!("Failed to load namespace {}", path.display()))?,
        None => SnapshotSource::demo(),
    };
    Ok(Arc::new(
        source.with_latency(Duration::from_millis(args.latency_ms)),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let file_appender = tracing_appender::rolling::daily(&args.log_dir, "ua-browser.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_filter(filter))
        .init();

    tracing::info!(root = %args.root, namespace = ?args.namespace, "Starting ua-browser");

    let source = build_source(&args)?;
    let mut app = App::new(
        source,
        NodeId::new(args.root.clone()),
        Duration::from_secs(args.timeout_secs),
    );

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        tracing::error!(error = ?err, "Application error");
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        if app.reload_requested {
            app.reload_requested = false;
            app.current_screen = CurrentScreen::Loading;
            terminal.draw(|f| ui::render(f, app))?;
            app.load_root().await;
        }

        // Commit finished background fetches
        app.poll_fetch_results();

        terminal.draw(|f| ui::render(f, app))?;

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
        {
            handle_key_event(app, key);
        }

        if app.current_screen == CurrentScreen::Exiting {
            return Ok(());
        }
    }
}

fn handle_key_event(app: &mut App, key: event::KeyEvent) {
    if key.kind != event::KeyEventKind::Press {
        return;
    }

    match app.current_screen {
        CurrentScreen::Browse => match key.code {
            KeyCode::Down => app.select_next(),
            KeyCode::Up => app.select_prev(),
            KeyCode::PageDown => app.page_down(),
            KeyCode::PageUp => app.page_up(),
            KeyCode::Right | KeyCode::Enter => app.expand_selected(),
            KeyCode::Left => app.collapse_selected(),
            KeyCode::Char('r') => app.invalidate_selected(),
            KeyCode::Char('R') => app.request_reload(),
            KeyCode::Char('c') => app.copy_path(),
            KeyCode::Char('i') => app.copy_node_id(),
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => app.quit(),
            _ => {}
        },
        CurrentScreen::Loading => {
            if key.code == KeyCode::Esc {
                app.quit();
            }
        }
        CurrentScreen::Exiting => {}
    }
}

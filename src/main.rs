//! recite - listen-and-answer flashcard drill TUI
//!
//! Loads a CSV of question/answer cards, shows them one at a time, and can
//! read both sides aloud through the OpenAI speech API, including a timed
//! hands-free loop for studying away from the keyboard.

mod config;
mod dataset;
mod models;
mod player;
mod session;
mod speech;
mod ui;

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;

use models::{CategoryFilter, Deck};
use ui::App;

// ══════════════════════════════════════════════════════════════════════════
// CLI Arguments
// ══════════════════════════════════════════════════════════════════════════

#[derive(Parser, Debug)]
#[command(name = "recite")]
#[command(author, version, about = "Listen-and-answer flashcard drill TUI", long_about = None)]
struct Args {
    /// CSV file with question/answer cards
    #[arg(default_value = "flashcards.csv")]
    cards: PathBuf,

    /// Start with this category filter active
    #[arg(short, long)]
    category: Option<String>,
}

// ══════════════════════════════════════════════════════════════════════════
// Main Entry Point
// ══════════════════════════════════════════════════════════════════════════

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging()?;

    let deck = dataset::load_deck(&args.cards)?;
    tracing::info!(cards = deck.len(), path = %args.cards.display(), "deck loaded");

    let filter = match args.category {
        Some(name) => CategoryFilter::Category(name),
        None => CategoryFilter::All,
    };
    let deck_title = args
        .cards
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("recite")
        .to_string();

    run_tui(deck, filter, deck_title)
}

/// Log to a file; the terminal itself belongs to the TUI.
fn init_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recite");
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join("recite.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "recite=info".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();
    eprintln!("logging to {}", log_path.display());
    Ok(())
}

fn run_tui(deck: Deck, filter: CategoryFilter, deck_title: String) -> Result<()> {
    // Load config
    let config = config::Config::load().unwrap_or_default();

    // Create app
    let mut app = App::new(deck, filter, config, deck_title)?;

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run main loop
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    // Handle any errors
    if let Err(err) = result {
        eprintln!("Error: {}", err);
        return Err(err);
    }

    Ok(())
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    while app.running {
        terminal.draw(|frame| app.render(frame))?;
        app.handle_events()?;
        app.tick();
    }
    Ok(())
}

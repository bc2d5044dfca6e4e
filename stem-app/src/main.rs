//! Stems - multitrack rehearsal mixer
//!
//! Line-oriented prompt over the stem audio engine: download songs from the
//! catalog, load them, and mix their tracks live.

mod commands;
mod output;
mod session;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use stem_audio::{AudioEngine, EngineConfig};
use stem_library::{Config, LibraryDb, SongCatalog};

use crate::commands::parse_command;
use crate::output::AudioOutput;
use crate::session::Session;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let db_path = config.library_db_path();
    let db = Arc::new(LibraryDb::open(&db_path)?);
    tracing::info!("Library at {}", db_path.display());

    let catalog = SongCatalog::new(&config.api_url)
        .with_offline_cache(config.catalog_cache_path(), config.catalog_ttl());

    let (context, output) = AudioOutput::start()?;
    let engine = AudioEngine::with_symphonia(
        context,
        db.clone(),
        EngineConfig {
            cache_capacity: config.cache_capacity,
        },
    );

    println!("stems - {} - type 'help'", output.description());

    let mut session = Session::new(config, engine, db, catalog);
    let result = run_prompt(&mut session);

    // Engine releases the graph before the device goes away
    drop(session);
    output.shutdown();

    result
}

fn run_prompt(session: &mut Session) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "stems> ")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(command) => match session.handle(command) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => eprintln!("error: {e:#}"),
            },
            None => println!("Unknown command, type 'help'"),
        }
    }
}

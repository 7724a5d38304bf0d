//! cbro-resolve - reading-order reference resolver
//!
//! Resolves `{series_name, issue_number, year?}` references against the
//! ComicVine catalog through the shared lookup cache, and maintains that
//! cache.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cbro_common::config::{load_engine_config, EngineConfig, LoggingConfig};
use cbro_common::events::EventBus;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use cbro_resolve::models::{BatchSummary, Reference};
use cbro_resolve::ResolutionEngine;

/// Command-line arguments for cbro-resolve
#[derive(Parser, Debug)]
#[command(name = "cbro-resolve")]
#[command(about = "Resolve reading-order references against the ComicVine catalog")]
#[command(version)]
struct Args {
    /// TOML config file (default: $CBRO_CONFIG, then ~/.config/cbro/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print progress events as JSON lines on stderr
    #[arg(long, global = true)]
    events: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a JSON array of references
    Resolve {
        /// Input file: [{"series_name": ..., "issue_number": ..., "year": ...}]
        input: PathBuf,

        /// Write results here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Remove expired cache entries
    Sweep,
    /// Print cache statistics
    Stats,
    /// Show catalog detail for one series
    Series {
        /// ComicVine volume id
        id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration errors are fatal before any reference is touched
    let config = load_config(args.config.as_deref(), std::io::stderr)?;

    init_logging(&config.logging)?;

    info!("Starting cbro-resolve {}", env!("CARGO_PKG_VERSION"));
    info!("Cache: {}", config.cache_path.display());

    let pool = cbro_common::db::init_database(&config.cache_path)
        .await
        .context("Failed to open cache database")?;

    let event_bus = EventBus::new(256);
    if args.events {
        spawn_event_printer(&event_bus);
    }

    let engine = ResolutionEngine::from_config(&config, pool)
        .context("Failed to initialize resolution engine")?
        .with_event_bus(event_bus);

    if config.cache.sweep_on_startup && !matches!(args.command, Command::Sweep) {
        if let Err(e) = engine.sweep().await {
            warn!(error = %e, "Startup cache sweep failed");
        }
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match args.command {
        Command::Resolve { input, output } => {
            resolve_file(&engine, &input, output.as_deref(), &cancel).await?
        }
        Command::Sweep => {
            let removed = engine.sweep().await.context("Cache sweep failed")?;
            println!("Removed {} expired entries", removed);
        }
        Command::Stats => {
            let stats = engine.cache().stats().await.context("Failed to read cache stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Series { id } => {
            let series = engine
                .series_detail(id, &cancel)
                .await
                .with_context(|| format!("Failed to fetch series {}", id))?;
            println!("{}", serde_json::to_string_pretty(&series)?);
        }
    }

    Ok(())
}

async fn resolve_file(
    engine: &ResolutionEngine,
    input: &Path,
    output: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let mut references: Vec<Reference> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid reference list in {}", input.display()))?;

    for (position, reference) in references.iter_mut().enumerate() {
        reference.position = position;
    }

    let progress = |current: usize, total: usize, status: &str| {
        eprintln!("[{}/{}] {}", current, total, status);
    };

    let results = engine.resolve_all(references, &progress, cancel).await;
    let summary = BatchSummary::tally(&results);

    let json = serde_json::to_string_pretty(&results)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Results written to {}", path.display());
        }
        None => println!("{}", json),
    }

    eprintln!(
        "{} resolved ({} cached), {} ambiguous, {} unmatched, {} failed, {} cancelled",
        summary.resolved,
        summary.from_cache,
        summary.ambiguous,
        summary.unmatched,
        summary.failed,
        summary.cancelled
    );

    Ok(())
}

/// Load configuration under a temporary subscriber writing to `writer`
///
/// The configured subscriber does not exist yet, so messages logged while
/// loading (a missing config file, say) would otherwise be dropped.
fn load_config<W>(path: Option<&Path>, writer: W) -> Result<EngineConfig>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(writer)
        .finish();

    tracing::subscriber::with_default(bootstrap, || load_engine_config(path))
        .context("Failed to load configuration")
}

/// Install the fmt subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid logging.level")?;

    match &config.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn spawn_event_printer(event_bus: &EventBus) {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => eprintln!("{}", line),
                    Err(e) => warn!(error = %e, "Failed to serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Ctrl-C raises the cancellation token; in-flight work winds down and the
/// partial batch is still written
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, cancelling");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}

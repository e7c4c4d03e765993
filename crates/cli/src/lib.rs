use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use roadbook_core::store::keys;
use roadbook_core::{
    DocumentSession, JsonFileStore, KeyValueStore, LoadParams, LoadState, PageBatch,
    RoadbookConfig, ScrollLedger, ScrollPosition,
};
use roadbook_render::{ContentHandle, PageRenderSource, PdfiumSource};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "roadbook")]
#[command(about = "Roadbook pager and session tool")]
pub struct Cli {
    /// Directory holding the session file and imported documents
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import a document, make it active and print its first window.
    Load {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Print a window of the active document.
    Window {
        /// First page of the window; defaults to the refresh key
        #[arg(long)]
        anchor: Option<u32>,
        /// Number of pages to load
        #[arg(long)]
        size: Option<u32>,
    },
    /// Persist a scroll position for the active document.
    Scroll {
        #[arg(value_name = "PAGE")]
        page: u32,
        #[arg(value_name = "OFFSET")]
        offset: u32,
    },
    /// Print the persisted document and scroll position.
    Status,
    /// Forget the active document.
    Clear,
}

#[derive(Debug, Serialize)]
struct StatusOutput {
    document: Option<String>,
    scroll: ScrollPosition,
}

#[derive(Debug, Serialize)]
struct WindowOutput {
    document: String,
    page_count: u32,
    pages: Vec<PageOutput>,
    prev_key: Option<u32>,
    next_key: Option<u32>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    index: u32,
    width: u32,
    height: u32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing();

    let config = load_config(cli.config.as_deref(), cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Load { file } => run_load(config, &file),
        Commands::Window { anchor, size } => run_window(config, anchor, size),
        Commands::Scroll { page, offset } => run_scroll(config, page, offset),
        Commands::Status => run_status(&config),
        Commands::Clear => run_clear(config),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A subscriber may already be installed when `run` is called more than once.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>, data_dir: Option<&Path>) -> Result<RoadbookConfig> {
    let config = match path {
        Some(path) => RoadbookConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?
            .with_env_overrides()?,
        None => RoadbookConfig::from_env()?,
    };

    let config = match data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    };
    config.validate()?;
    Ok(config)
}

fn open_session(config: RoadbookConfig) -> Result<DocumentSession> {
    let sources = || -> Box<dyn PageRenderSource> { Box::new(PdfiumSource::new()) };
    DocumentSession::builder(config, sources)
        .build()
        .context("failed to start session")
}

fn run_load(config: RoadbookConfig, file: &Path) -> Result<()> {
    let session = open_session(config)?;
    let states = session.subscribe();

    let result = session
        .load_document(ContentHandle::from_path(file))
        .with_context(|| format!("failed to load {}", file.display()))
        .and_then(|_| first_batch(&session, &states));

    session.shutdown();
    print_window(&session, &*result?)
}

fn run_window(config: RoadbookConfig, anchor: Option<u32>, size: Option<u32>) -> Result<()> {
    let load_size = size.unwrap_or(config.initial_load_size);
    let session = open_session(config)?;

    let result = session
        .restore()
        .context("failed to reopen document")
        .and_then(|restored| {
            restored.context("no document loaded; run `roadbook load <FILE>` first")
        })
        .and_then(|_| {
            let batch = session.load_window_blocking(LoadParams::new(anchor, load_size))?;
            Ok(batch)
        });

    session.shutdown();
    print_window(&session, &*result?)
}

fn run_scroll(config: RoadbookConfig, page: u32, offset: u32) -> Result<()> {
    let session_file = config.session_file();
    let session = open_session(config)?;

    let result = session.persist_scroll(page, offset);
    // Shutdown drains the queued write.
    session.shutdown();
    result?;

    let store = JsonFileStore::open(session_file)?;
    print_json(&status(Arc::new(store)))
}

fn run_status(config: &RoadbookConfig) -> Result<()> {
    let store = JsonFileStore::open(config.session_file())
        .with_context(|| format!("failed to read {}", config.session_file().display()))?;
    print_json(&status(Arc::new(store)))
}

fn run_clear(config: RoadbookConfig) -> Result<()> {
    let session = open_session(config)?;

    if let Err(error) = session.restore() {
        tracing::warn!(%error, "could not reopen document before clearing");
    }
    let result = session.clear_document();

    session.shutdown();
    result.context("failed to clear document")?;
    println!("cleared");
    Ok(())
}

fn status(store: Arc<dyn KeyValueStore>) -> StatusOutput {
    let document = store.get_string(keys::DOCUMENT_URI);
    let scroll = ScrollLedger::new(store).get();
    StatusOutput { document, scroll }
}

/// Wait for the first settled state of the current load
fn first_batch(session: &DocumentSession, states: &Receiver<LoadState>) -> Result<Arc<PageBatch>> {
    let deadline = Instant::now() + session.config().io_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match states.recv_timeout(remaining) {
            Ok(LoadState::Loaded { batch }) => return Ok(batch),
            Ok(LoadState::Error { kind, message, .. }) => {
                anyhow::bail!("failed to load window ({kind}): {message}")
            }
            Ok(_) => continue,
            Err(RecvTimeoutError::Timeout) => anyhow::bail!("timed out waiting for pages"),
            Err(RecvTimeoutError::Disconnected) => anyhow::bail!("session stopped"),
        }
    }
}

fn print_window(session: &DocumentSession, batch: &PageBatch) -> Result<()> {
    let snapshot = session.snapshot();
    let payload = WindowOutput {
        document: snapshot.document.map(|id| id.to_string()).unwrap_or_default(),
        page_count: snapshot.page_count,
        pages: batch
            .pages()
            .iter()
            .map(|page| PageOutput {
                index: page.index(),
                width: page.image().width(),
                height: page.image().height(),
            })
            .collect(),
        prev_key: batch.prev_key(),
        next_key: batch.next_key(),
    };
    print_json(&payload)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

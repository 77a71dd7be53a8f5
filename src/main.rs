//! # rifflux CLI
//!
//! Local-first hybrid retrieval over a directory of Markdown notes.
//!
//! ```bash
//! rifflux init                         # create the database
//! rifflux reindex --path ./docs       # index a directory
//! rifflux search "wal checkpoints"    # hybrid search
//! rifflux search "wal" --mode lexical --top-k 5
//! rifflux get-chunk <chunk_id>        # fetch one chunk
//! rifflux get-file docs/notes.md      # fetch a file's chunks
//! rifflux status                      # counts, jobs, watcher state
//! rifflux rebuild --path ./docs       # delete the DB, force reindex
//! rifflux serve                       # start the HTTP tool server
//! ```
//!
//! All commands accept `--config` (TOML, optional) and `--db` (overrides the
//! configured database path). Command output is JSON; logs go to stderr,
//! filtered by `RIFFLUX_LOG`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use rifflux::engine::Engine;
use rifflux::models::SearchMode;
use rifflux::{config, server};

#[derive(Parser)]
#[command(
    name = "rifflux",
    about = "Local hybrid retrieval over Markdown: FTS5 + embeddings fused with RRF",
    version
)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long, global = true, default_value = "./config/rifflux.toml")]
    config: PathBuf,

    /// Override the configured database path.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and schema. Idempotent.
    Init,

    /// Scan paths and index new or changed files.
    Reindex {
        /// Paths to scan; defaults to the current directory.
        #[arg(long = "path")]
        paths: Vec<PathBuf>,

        /// Rebuild every matching file even if unchanged.
        #[arg(long)]
        force: bool,

        /// Keep tracked files that were not seen during the scan.
        #[arg(long)]
        no_prune: bool,

        /// Queue the reindex on the background worker and print the job.
        #[arg(long)]
        background: bool,
    },

    /// Query the index.
    Search {
        query: String,

        /// Retrieval mode: lexical, semantic, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Number of results (1-100).
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },

    /// Fetch one chunk by its stable id.
    GetChunk { chunk_id: String },

    /// Fetch all chunks of an indexed file, in order.
    GetFile { path: String },

    /// Report index counts, metadata, background jobs, and watcher state.
    Status,

    /// Delete the database file and force a full reindex.
    Rebuild {
        /// Paths to scan; defaults to the current directory.
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },

    /// Start the HTTP tool server.
    Serve,
}

fn default_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        paths
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Remove the database plus its WAL sidecar files.
fn remove_database(db_path: &Path) -> Result<bool> {
    let existed = db_path.exists();
    for suffix in ["", "-wal", "-shm"] {
        let mut path = db_path.as_os_str().to_owned();
        path.push(suffix);
        let path = PathBuf::from(path);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(existed)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RIFFLUX_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = config::load_config(&cli.config)?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Init => {
            let engine = Engine::init(config).await?;
            engine.shutdown(Duration::from_secs(5)).await;
            println!("{{\"initialized\": true}}");
        }
        Commands::Reindex {
            paths,
            force,
            no_prune,
            background,
        } => {
            let engine = Engine::init(config).await?;
            let paths = default_paths(paths);
            if background {
                let snapshot = engine.reindex_background(paths, force, !no_prune)?;
                print_json(&snapshot)?;
                // Let the queued job finish before draining.
                engine.shutdown(Duration::from_secs(600)).await;
            } else {
                let report = engine.reindex(paths, force, !no_prune).await?;
                print_json(&report)?;
                engine.shutdown(Duration::from_secs(5)).await;
            }
        }
        Commands::Search { query, mode, top_k } => {
            let mode: SearchMode = mode.parse()?;
            let engine = Engine::init(config).await?;
            let response = engine.search(&query, Some(top_k), mode).await?;
            print_json(&response)?;
            engine.shutdown(Duration::from_secs(5)).await;
        }
        Commands::GetChunk { chunk_id } => {
            let engine = Engine::init(config).await?;
            let chunk = engine.get_chunk(&chunk_id).await?;
            print_json(&chunk)?;
            engine.shutdown(Duration::from_secs(5)).await;
        }
        Commands::GetFile { path } => {
            let engine = Engine::init(config).await?;
            let file = engine.get_file(&path).await?;
            print_json(&file)?;
            engine.shutdown(Duration::from_secs(5)).await;
        }
        Commands::Status => {
            let engine = Engine::init(config).await?;
            let status = engine.status().await?;
            print_json(&status)?;
            engine.shutdown(Duration::from_secs(5)).await;
        }
        Commands::Rebuild { paths } => {
            let deleted_existing_db = remove_database(&config.db_path)?;
            let engine = Engine::init(config).await?;
            let report = engine.reindex(default_paths(paths), true, true).await?;
            let payload = serde_json::json!({
                "deleted_existing_db": deleted_existing_db,
                "report": report,
            });
            print_json(&payload)?;
            engine.shutdown(Duration::from_secs(5)).await;
        }
        Commands::Serve => {
            let bind = config.server.bind.clone();
            let engine = Engine::init(config).await?;
            server::run_server(engine, &bind).await?;
        }
    }

    Ok(())
}

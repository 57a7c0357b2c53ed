//! # Lectio CLI (`lectio`)
//!
//! ## Usage
//!
//! ```bash
//! lectio --config ./config/lectio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectio serve` | Start the HTTP + websocket server |
//! | `lectio inspect <FILE>` | Show how a file would be identified and chunked |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lectio::chunk::chunk_text;
use lectio::config::{self, Config};
use lectio::context::AppContext;
use lectio::extract::load_document_blocking;
use lectio::hash::document_id;
use lectio::ingest::{preload_directory, sanitize_file_name};
use lectio::server;

/// Lectio: ask questions about your documents and hear the answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectio.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "lectio", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lectio.toml`. When the file does not exist,
    /// built-in defaults are used (offline providers, no speech).
    #[arg(long, global = true, default_value = "./config/lectio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server.
    ///
    /// Ingests `ingest.preload_dir` first when it is set, then serves until
    /// Ctrl+C or SIGTERM.
    Serve,

    /// Load and chunk a file without embedding it.
    ///
    /// Prints the identifier the file would be stored under, its size, and
    /// the resulting chunks.
    Inspect {
        /// File to inspect (.txt, .md, .pdf, .docx).
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;

    match cli.command {
        Commands::Serve => serve(cfg).await,
        Commands::Inspect { file } => inspect(&cfg, &file).await,
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lectio=info,tower_http=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file, falling back to defaults only when it is absent.
/// A file that exists but does not parse or validate is an error.
fn resolve_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        return config::load_config(path);
    }
    warn!(path = %path.display(), "config file not found, using defaults");
    let cfg = Config::minimal();
    config::validate(&cfg)?;
    Ok(cfg)
}

async fn serve(cfg: Config) -> anyhow::Result<()> {
    let preload = cfg.ingest.preload_dir.clone();
    let ctx = Arc::new(AppContext::from_config(cfg)?);

    if let Some(dir) = preload {
        let reports = preload_directory(&ctx, &dir).await?;
        info!(documents = reports.len(), "preload complete");
    }

    let shutdown = install_signal_handler();
    server::run_server(ctx, shutdown).await
}

/// Cancels the returned token on SIGINT (Ctrl+C) or SIGTERM.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT (Ctrl+C), shutting down"),
                        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    info!("received SIGINT (Ctrl+C), shutting down");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, shutting down");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

async fn inspect(cfg: &Config, file: &Path) -> anyhow::Result<()> {
    let name = sanitize_file_name(&file.to_string_lossy())?;
    let identifier = document_id(&name);
    let doc = load_document_blocking(
        file.to_path_buf(),
        identifier.clone(),
        cfg.ingest.max_file_bytes,
    )
    .await?;
    let chunks = chunk_text(
        &doc.id,
        &doc.text,
        cfg.chunking.max_tokens,
        cfg.chunking.overlap_tokens,
    );

    println!("file:        {}", name);
    println!("identifier:  {}", identifier);
    println!("type:        {}", doc.content_type);
    println!("bytes:       {}", doc.byte_count);
    println!("chunks:      {}", chunks.len());
    for chunk in &chunks {
        println!(
            "  [{}] {} chars  {}",
            chunk.chunk_index,
            chunk.text.chars().count(),
            &chunk.hash[..12]
        );
    }
    Ok(())
}

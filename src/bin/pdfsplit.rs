//! Server binary for edgequake-pdfsplit.
//!
//! A thin shim over the library crate that maps CLI flags to `SplitConfig`,
//! sets up logging and serves the HTTP API until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfsplit::{serve, SplitConfig, SplitService};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default address (127.0.0.1:3000)
  pdfsplit

  # Listen on all interfaces, keep data under /var/lib/pdfsplit
  pdfsplit --bind 0.0.0.0:8080 \
           --upload-dir /var/lib/pdfsplit/upload \
           --download-dir /var/lib/pdfsplit/download

  # Split faster: no pacing, 8 jobs at once
  pdfsplit --pacing-delay-ms 0 --workers 8

ENDPOINTS:
  GET  /                          Upload form
  POST /upload                    Upload a PDF (multipart field "pdfFile")
  GET  /progress/{id}             Job progress as JSON
  GET  /result/{id}               Files of a completed job
  GET  /download/{folder}/{file}  One page
  GET  /download-all/{folder}     Every page as a ZIP
  GET  /health                    Health check

ENVIRONMENT VARIABLES:
  Every flag can also be set as PDFSPLIT_<FLAG>, e.g. PDFSPLIT_BIND.
  RUST_LOG overrides --verbose / --quiet (e.g. RUST_LOG=edgequake_pdfsplit=debug).
"#;

/// Split uploaded PDFs into one file per page.
#[derive(Parser, Debug)]
#[command(
    name = "pdfsplit",
    version,
    about = "Split uploaded PDFs into one file per page, with progress polling and ZIP download",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PDFSPLIT_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Directory where accepted uploads are staged.
    #[arg(long, env = "PDFSPLIT_UPLOAD_DIR", default_value = "upload")]
    upload_dir: PathBuf,

    /// Directory holding one output folder per job.
    #[arg(long, env = "PDFSPLIT_DOWNLOAD_DIR", default_value = "download")]
    download_dir: PathBuf,

    /// Maximum number of jobs splitting at the same time.
    #[arg(short, long, env = "PDFSPLIT_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Maximum number of jobs kept by the progress tracker.
    #[arg(long, env = "PDFSPLIT_MAX_JOBS", default_value_t = 1024)]
    max_jobs: usize,

    /// Seconds a finished job stays pollable.
    #[arg(long, env = "PDFSPLIT_RETENTION_SECS", default_value_t = 3600)]
    retention_secs: u64,

    /// Seconds between retention sweeps.
    #[arg(long, env = "PDFSPLIT_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Delay before a registered job starts splitting, in milliseconds.
    #[arg(long, env = "PDFSPLIT_START_DELAY_MS", default_value_t = 100)]
    start_delay_ms: u64,

    /// Pause after every N pages.
    #[arg(long, env = "PDFSPLIT_PACING_BATCH", default_value_t = 5)]
    pacing_batch: usize,

    /// Length of each pacing pause in milliseconds (0 disables pacing).
    #[arg(long, env = "PDFSPLIT_PACING_DELAY_MS", default_value_t = 100)]
    pacing_delay_ms: u64,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "PDFSPLIT_MAX_UPLOAD_MB", default_value_t = 100)]
    max_upload_mb: usize,

    /// Deflate level for ZIP downloads (0-9).
    #[arg(long, env = "PDFSPLIT_COMPRESSION_LEVEL", default_value_t = 9,
          value_parser = clap::value_parser!(u8).range(0..=9))]
    compression_level: u8,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFSPLIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFSPLIT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let config = SplitConfig::builder()
        .bind_address(cli.bind)
        .upload_dir(cli.upload_dir)
        .download_dir(cli.download_dir)
        .max_concurrent_jobs(cli.workers)
        .max_jobs(cli.max_jobs)
        .retention_secs(cli.retention_secs)
        .sweep_interval_secs(cli.sweep_interval_secs)
        .start_delay_ms(cli.start_delay_ms)
        .pacing_batch(cli.pacing_batch)
        .pacing_delay_ms(cli.pacing_delay_ms)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .compression_level(cli.compression_level)
        .build()
        .context("Invalid configuration")?;

    info!(
        "Upload dir: {}, download dir: {}, {} workers",
        config.upload_dir.display(),
        config.download_dir.display(),
        config.max_concurrent_jobs
    );

    // ── Service ──────────────────────────────────────────────────────────
    let addr = config.bind_address;
    let service = Arc::new(SplitService::new(config).context("Invalid configuration")?);
    service
        .prepare_dirs()
        .await
        .context("Failed to create upload/download directories")?;
    let sweeper = service.spawn_sweeper();

    // ── Serve ────────────────────────────────────────────────────────────
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    serve(listener, Arc::clone(&service), shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

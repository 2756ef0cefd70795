//! Partwise CLI
//!
//! Uploads files through a multipart backend and resumes interrupted
//! uploads on the next run.

mod config;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use partwise_protocol::UploadStatus;
use partwise_transfer::{FileSource, LocalFile};
use partwise_uploader::{HttpBackend, JsonFileStore, Services, StateStore, UploadManager};

use config::CliConfig;
use report::{EventPrinter, format_bytes};

/// Resumable multipart uploads
#[derive(Parser)]
#[command(name = "partwise")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files, resuming earlier uploads of the same files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Backend base URL
        #[arg(long)]
        endpoint: Option<String>,

        /// State file path
        #[arg(long)]
        state: Option<PathBuf>,

        /// Maximum uploads running at once
        #[arg(long)]
        parallel: Option<usize>,
    },

    /// List unfinished uploads
    Status {
        /// State file path
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CliConfig::load();

    match cli.command {
        Commands::Upload {
            files,
            endpoint,
            state,
            parallel,
        } => {
            if let Some(endpoint) = endpoint {
                config.endpoint = Some(endpoint);
            }
            if let Some(parallel) = parallel {
                config.uploader.max_parallel = parallel;
            }
            let state = config.state_path(state)?;
            upload(config, &files, state).await
        }
        Commands::Status { state } => show_status(&config.state_path(state)?),
    }
}

async fn upload(config: CliConfig, paths: &[PathBuf], state: PathBuf) -> anyhow::Result<()> {
    let endpoint = config
        .endpoint
        .as_deref()
        .context("no backend endpoint configured; pass --endpoint")?;

    let mut files: Vec<Arc<dyn FileSource>> = Vec::with_capacity(paths.len());
    for path in paths {
        let file = LocalFile::open(path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?;
        files.push(Arc::new(file));
    }

    let http = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let services = Services::http(
        HttpBackend::new(http, endpoint),
        Arc::new(JsonFileStore::new(state)),
    );
    let manager = UploadManager::start(config.uploader, services);
    let mut events = manager
        .take_events()
        .context("upload events already taken")?;

    // Rejections arrive as events and are printed with the rest.
    let report = manager.enqueue(files).await?;
    if !report.reattached.is_empty() {
        println!("resuming {} earlier upload(s)", report.reattached.len());
    }

    let mut printer = EventPrinter::default();
    let mut tick = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("interrupted; pausing uploads");
                break;
            }
            Some(event) = events.recv() => printer.print(&event),
            _ = tick.tick() => {
                let views = manager.snapshot().await?;
                let busy = views
                    .iter()
                    .any(|v| matches!(v.status, UploadStatus::Queued | UploadStatus::Uploading));
                if !busy {
                    break;
                }
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        printer.print(&event);
    }
    let views = manager.snapshot().await?;
    manager.shutdown().await?;

    let failed = views
        .iter()
        .filter(|v| v.status == UploadStatus::Error)
        .count();
    let done = views
        .iter()
        .filter(|v| v.status == UploadStatus::Done)
        .count();
    println!("{done} uploaded, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed; run again to retry");
    }
    Ok(())
}

fn show_status(state: &Path) -> anyhow::Result<()> {
    let store = JsonFileStore::new(state.to_path_buf());
    let Some(saved) = store
        .load()
        .with_context(|| format!("cannot read {}", state.display()))?
    else {
        println!("no unfinished uploads");
        return Ok(());
    };
    if saved.uploads.is_empty() {
        println!("no unfinished uploads");
        return Ok(());
    }

    println!("saved {}", saved.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    for upload in &saved.uploads {
        let parts_done = upload.chunks.iter().filter(|c| c.uploaded).count();
        println!(
            "{:<32} {:>3}%  {} / {}  {parts_done}/{} parts  {}",
            upload.name,
            upload.progress,
            format_bytes(upload.uploaded_bytes),
            format_bytes(upload.size),
            upload.chunks.len(),
            upload.status.label(),
        );
        if let Some(error) = &upload.error {
            println!("    last error: {error}");
        }
    }
    Ok(())
}

//! Command-line client for resumable uploads.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use reelhub_upload_client::{
    HttpTransport, RetryPolicy, UploadEvent, UploadOptions, UploadTransport, Uploader,
};

#[derive(Parser)]
#[command(name = "reelhub-upload")]
#[command(about = "Upload large video files in resumable chunks")]
#[command(version)]
struct Cli {
    /// Upload server base URL
    #[arg(long, env = "REELHUB_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, optionally resuming an earlier session
    Upload {
        file: PathBuf,

        /// Session id printed by an interrupted run
        #[arg(long)]
        resume: Option<String>,

        /// Chunk size in bytes (default: chosen from the file size)
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Skip per-chunk SHA-256 checksums
        #[arg(long)]
        no_checksum: bool,

        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Show which chunks the server holds for a session
    Status { session_id: String },
}

#[derive(Args, Clone)]
struct RetryArgs {
    /// Attempts per chunk, including the first
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Per-chunk timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Backoff step in milliseconds; attempt n waits n steps
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,
}

impl RetryArgs {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retries.max(1),
            chunk_timeout: Duration::from_secs(self.timeout.max(1)),
            backoff_step: Duration::from_millis(self.backoff_ms),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let transport = HttpTransport::new(reqwest::Client::new(), cli.server.clone());

    match cli.command {
        Commands::Upload {
            file,
            resume,
            chunk_size,
            no_checksum,
            retry,
        } => {
            let options = UploadOptions {
                retry: retry.policy(),
                chunk_size,
                resume_session: resume,
                send_checksums: !no_checksum,
            };
            upload(transport, &file, options).await
        }
        Commands::Status { session_id } => status(&transport, &session_id).await,
    }
}

async fn upload(
    transport: HttpTransport,
    file: &std::path::Path,
    options: UploadOptions,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(rx));

    let uploader = Uploader::new(transport, options, cancel);
    let result = uploader.upload(file, &tx).await;
    drop(tx);
    let session_id = printer.await.context("progress printer panicked")?;

    match result {
        Ok(report) => {
            println!("{}", report.url);
            Ok(())
        }
        Err(e) => {
            if let Some(id) = session_id {
                eprintln!("resume with: --resume {id}");
            }
            Err(e).with_context(|| format!("uploading {}", file.display()))
        }
    }
}

/// Prints events to stderr. Returns the session id once known.
async fn print_events(mut rx: mpsc::Receiver<UploadEvent>) -> Option<String> {
    let mut session = None;
    let mut last_percent = None;

    while let Some(event) = rx.recv().await {
        match event {
            UploadEvent::Planned {
                session_id,
                file_size,
                chunk_size,
                total_chunks,
                already_received,
            } => {
                eprintln!(
                    "session {session_id}: {file_size} bytes in {total_chunks} chunks of {chunk_size} ({already_received} already on server)"
                );
                session = Some(session_id);
            }
            UploadEvent::Progress {
                overall,
                bytes_per_second,
                eta,
                ..
            } => {
                let percent = (overall * 100.0).floor() as u32;
                if last_percent != Some(percent) {
                    last_percent = Some(percent);
                    let eta = eta.map(|d| format!(", eta {}s", d.as_secs())).unwrap_or_default();
                    eprintln!(
                        "{percent:>3}%  {:.1} MiB/s{eta}",
                        bytes_per_second / (1024.0 * 1024.0)
                    );
                }
            }
            UploadEvent::ChunkSent { .. } => {}
            UploadEvent::Finalizing { .. } => eprintln!("finalizing..."),
            UploadEvent::Completed { .. } => eprintln!("done"),
            UploadEvent::Failed { error } => eprintln!("failed: {error}"),
        }
    }

    session
}

async fn status(transport: &HttpTransport, session_id: &str) -> Result<()> {
    let status = transport
        .status(session_id)
        .await
        .context("querying session status")?;

    if !status.exists {
        anyhow::bail!("session {session_id} not found");
    }
    println!(
        "{}/{} chunks received",
        status.existing_chunks, status.total_chunks
    );
    if !status.missing_chunks.is_empty() {
        println!("missing: {:?}", status.missing_chunks);
    }
    Ok(())
}

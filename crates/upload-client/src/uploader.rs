//! Sequential resumable uploader.
//!
//! One file per [`Uploader::upload`] call. The pipeline:
//! 1. Plan chunk ranges for the file size
//! 2. Init a session, or resume one after asking the server what it holds
//! 3. Send missing chunks in index order, one in flight
//! 4. Finalize; if the server reports gaps, fill them once and finalize again

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use reelhub_protocol::InitUploadRequest;
use reelhub_transfer::{
    ChunkPlan, ChunkReader, ChunkSizePolicy, SpeedCalculator, TransferError, chunk_fraction,
    overall_fraction, validate_file_name,
};

use crate::error::ClientError;
use crate::retry::{ChunkTransport, RetryPolicy};
use crate::transport::{ChunkUpload, ProgressFn, UploadTransport};

/// Options for one upload.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub retry: RetryPolicy,
    /// Overrides the size-tier policy. A resumed upload always slices with
    /// the chunk size of the session it resumes.
    pub chunk_size: Option<u64>,
    /// Resume this session instead of starting a new one.
    pub resume_session: Option<String>,
    /// Attach a SHA-256 checksum to every chunk.
    pub send_checksums: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            chunk_size: None,
            resume_session: None,
            send_checksums: true,
        }
    }
}

/// Events emitted while an upload runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// The session is known and the plan is fixed.
    Planned {
        session_id: String,
        file_size: u64,
        chunk_size: u64,
        total_chunks: u32,
        already_received: u32,
    },
    /// Bytes of the current chunk handed to the network.
    Progress {
        index: u32,
        chunk_fraction: f64,
        overall: f64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// The server acknowledged a chunk.
    ChunkSent {
        index: u32,
        received_chunks: u32,
        total_chunks: u32,
    },
    Finalizing { session_id: String },
    Completed { url: String },
    Failed { error: String },
}

/// Outcome of a finished upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub session_id: String,
    pub url: String,
    pub public_id: String,
    pub size: u64,
    /// Chunks transmitted by this run, including gap refills.
    pub chunks_sent: u32,
    /// Chunks the server already held when this run started.
    pub chunks_skipped: u32,
}

/// Byte and chunk counters shared with the progress callback.
struct Tally {
    total_chunks: u32,
    file_size: u64,
    completed_chunks: u32,
    completed_bytes: u64,
}

/// Drives a single upload over an [`UploadTransport`].
pub struct Uploader<T> {
    sender: ChunkTransport<T>,
    policy: ChunkSizePolicy,
    options: UploadOptions,
    cancel: CancellationToken,
}

impl<T: UploadTransport> Uploader<T> {
    pub fn new(transport: T, options: UploadOptions, cancel: CancellationToken) -> Self {
        Self {
            sender: ChunkTransport::new(transport, options.retry),
            policy: ChunkSizePolicy::default(),
            options,
            cancel,
        }
    }

    /// Replaces the default size tiers.
    pub fn with_policy(mut self, policy: ChunkSizePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Uploads `path`, reporting through `events_tx`.
    ///
    /// On failure a [`UploadEvent::Failed`] is emitted before the error is
    /// returned. The session id in the `Planned` event is what a caller
    /// passes back as `resume_session` to continue later.
    pub async fn upload(
        &self,
        path: &Path,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadReport, ClientError> {
        match self.run(path, events_tx).await {
            Ok(report) => {
                let _ = events_tx
                    .send(UploadEvent::Completed {
                        url: report.url.clone(),
                    })
                    .await;
                Ok(report)
            }
            Err(e) => {
                let _ = events_tx
                    .send(UploadEvent::Failed {
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        path: &Path,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadReport, ClientError> {
        self.check_cancelled()?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidFileName(path.display().to_string()))?;
        validate_file_name(&file_name)?;

        let file_size = tokio::fs::metadata(path).await?.len();
        let mut plan = match self.options.chunk_size {
            Some(size) => ChunkPlan::with_chunk_size(file_size, size)?,
            None => self.policy.plan(file_size)?,
        };

        let (session_id, received) = self.open_session(&file_name, &mut plan).await?;

        let total_chunks = plan.total_chunks();
        let already_received = received.len() as u32;
        info!(
            session = %session_id,
            file = %file_name,
            file_size,
            chunk_size = plan.chunk_size,
            total_chunks,
            already_received,
            "upload planned"
        );
        let _ = events_tx
            .send(UploadEvent::Planned {
                session_id: session_id.clone(),
                file_size,
                chunk_size: plan.chunk_size,
                total_chunks,
                already_received,
            })
            .await;

        let completed_bytes = plan
            .ranges
            .iter()
            .filter(|r| received.contains(&r.index))
            .map(|r| r.len)
            .sum();
        let mut tally = Tally {
            total_chunks,
            file_size,
            completed_chunks: already_received,
            completed_bytes,
        };

        let reader = tokio::task::spawn_blocking({
            let path = path.to_path_buf();
            let plan = plan.clone();
            move || ChunkReader::open(&path, plan)
        })
        .await
        .map_err(join_error)??;

        let pending: Vec<u32> = (0..total_chunks)
            .filter(|i| !received.contains(i))
            .collect();
        let speed = Arc::new(SpeedCalculator::default());

        let (reader, mut chunks_sent) = self
            .send_indices(reader, &session_id, &pending, &mut tally, &speed, events_tx)
            .await?;

        self.check_cancelled()?;
        let _ = events_tx
            .send(UploadEvent::Finalizing {
                session_id: session_id.clone(),
            })
            .await;

        let done = match self.sender.transport().finalize(&session_id).await {
            Ok(done) => done,
            Err(e) => {
                let Some(missing) = e.missing_chunks() else {
                    return Err(e);
                };
                let missing: Vec<u32> = missing
                    .iter()
                    .copied()
                    .filter(|&i| i < total_chunks)
                    .collect();
                warn!(
                    session = %session_id,
                    missing = missing.len(),
                    "server reported gaps at finalize, resending"
                );

                tally.completed_chunks = tally.completed_chunks.saturating_sub(missing.len() as u32);
                for &index in &missing {
                    let len = plan.range(index)?.len;
                    tally.completed_bytes = tally.completed_bytes.saturating_sub(len);
                }

                let (_, refilled) = self
                    .send_indices(reader, &session_id, &missing, &mut tally, &speed, events_tx)
                    .await?;
                chunks_sent += refilled;

                self.check_cancelled()?;
                self.sender.transport().finalize(&session_id).await?
            }
        };

        info!(session = %session_id, url = %done.url, size = done.size, "upload finalized");

        Ok(UploadReport {
            session_id,
            url: done.url,
            public_id: done.public_id,
            size: done.size,
            chunks_sent,
            chunks_skipped: already_received,
        })
    }

    /// Resumes the configured session if the server still has it,
    /// otherwise initializes a new one. Adjusts `plan` to the session's
    /// chunk size in both cases.
    async fn open_session(
        &self,
        file_name: &str,
        plan: &mut ChunkPlan,
    ) -> Result<(String, BTreeSet<u32>), ClientError> {
        if let Some(id) = &self.options.resume_session {
            self.check_cancelled()?;
            let status = self.sender.transport().status(id).await?;
            if status.exists {
                if status.chunk_size > 0 && status.chunk_size != plan.chunk_size {
                    debug!(
                        session = %id,
                        planned = plan.chunk_size,
                        session_chunk_size = status.chunk_size,
                        "re-planning with the session's chunk size"
                    );
                    *plan = ChunkPlan::with_chunk_size(plan.file_size, status.chunk_size)?;
                }
                if status.total_chunks != plan.total_chunks() {
                    return Err(ClientError::SessionMismatch(id.clone()));
                }
                debug!(session = %id, received = status.existing_chunks, "resuming session");
                return Ok((id.clone(), status.received_chunks.into_iter().collect()));
            }
            warn!(session = %id, "session to resume no longer exists, starting over");
        }

        self.check_cancelled()?;
        let req = InitUploadRequest {
            file_name: file_name.to_string(),
            file_size: plan.file_size as i64,
            total_chunks: Some(plan.total_chunks()),
            chunk_size: plan.chunk_size as i64,
        };
        let resp = self.sender.transport().init(&req).await?;

        if resp.chunk_size != plan.chunk_size {
            debug!(
                requested = plan.chunk_size,
                granted = resp.chunk_size,
                "server chose a different chunk size"
            );
            *plan = ChunkPlan::with_chunk_size(plan.file_size, resp.chunk_size)?;
        }
        if resp.total_chunks != plan.total_chunks() {
            return Err(ClientError::SessionMismatch(resp.session_id));
        }

        Ok((resp.session_id, BTreeSet::new()))
    }

    /// Sends `indices` in order. Returns the reader for reuse and the number sent.
    async fn send_indices(
        &self,
        mut reader: ChunkReader,
        session_id: &str,
        indices: &[u32],
        tally: &mut Tally,
        speed: &Arc<SpeedCalculator>,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<(ChunkReader, u32), ClientError> {
        let mut sent = 0;

        for &index in indices {
            self.check_cancelled()?;

            let (r, chunk) = tokio::task::spawn_blocking(move || {
                let chunk = reader.read_chunk(index);
                (reader, chunk)
            })
            .await
            .map_err(join_error)?;
            reader = r;
            let chunk = chunk?;

            let len = chunk.size() as u64;
            let upload = ChunkUpload {
                session_id: session_id.to_string(),
                index,
                total_chunks: tally.total_chunks,
                checksum: self.options.send_checksums.then_some(chunk.checksum),
                data: Bytes::from(chunk.data),
            };

            let progress = progress_callback(index, len, tally, Arc::clone(speed), events_tx.clone());
            let ack = self
                .sender
                .send_chunk(&upload, progress, &self.cancel)
                .await?;

            tally.completed_chunks += 1;
            tally.completed_bytes += len;
            sent += 1;

            let _ = events_tx
                .send(UploadEvent::ChunkSent {
                    index,
                    received_chunks: ack.received_chunks,
                    total_chunks: ack.total_chunks,
                })
                .await;
        }

        Ok((reader, sent))
    }

    fn check_cancelled(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Builds the per-chunk progress callback. Events are dropped rather than
/// awaited if the receiver falls behind.
fn progress_callback(
    index: u32,
    chunk_len: u64,
    tally: &Tally,
    speed: Arc<SpeedCalculator>,
    events_tx: mpsc::Sender<UploadEvent>,
) -> ProgressFn {
    let completed_chunks = tally.completed_chunks;
    let completed_bytes = tally.completed_bytes;
    let total_chunks = tally.total_chunks;
    let file_size = tally.file_size;
    let last = AtomicU64::new(0);

    Arc::new(move |sent: u64| {
        // A retry restarts the count from zero.
        let prev = last.swap(sent, Ordering::Relaxed);
        speed.add_sample(if sent >= prev { sent - prev } else { sent });

        let fraction = chunk_fraction(sent, chunk_len);
        let remaining = file_size.saturating_sub(completed_bytes + sent.min(chunk_len));
        let _ = events_tx.try_send(UploadEvent::Progress {
            index,
            chunk_fraction: fraction,
            overall: overall_fraction(completed_chunks, fraction, total_chunks),
            bytes_per_second: speed.bytes_per_second(),
            eta: speed.eta(remaining),
        });
    })
}

fn join_error(e: tokio::task::JoinError) -> ClientError {
    ClientError::Io(std::io::Error::other(format!("task join error: {e}")))
}

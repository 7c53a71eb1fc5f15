//! Background reclamation of abandoned sessions.
//!
//! Clients may walk away mid-upload. The sweeper periodically disposes
//! sessions idle longer than the retention window and deletes merged files
//! left behind by a crash during finalize.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use reelhub_session_store::{SessionStore, StoreError};

use crate::gate::FinalizeGate;
use crate::reassembler::ASSEMBLING_EXT;

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub disposed: Vec<String>,
    pub skipped_in_flight: Vec<String>,
    pub orphans_removed: usize,
}

/// Periodic garbage collector for the session store.
pub struct Sweeper {
    store: Arc<dyn SessionStore>,
    gate: FinalizeGate,
    assembly_dir: PathBuf,
    retention: chrono::Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        gate: FinalizeGate,
        assembly_dir: impl Into<PathBuf>,
        retention: chrono::Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            assembly_dir: assembly_dir.into(),
            retention,
            interval,
        }
    }

    /// Sweeps every `interval` until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_hours = self.retention.num_hours(),
            "session sweeper started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("session sweeper stopped");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report.disposed.is_empty() && report.orphans_removed == 0 => {
                            debug!("sweep found nothing to reclaim");
                        }
                        Ok(report) => {
                            info!(
                                disposed = report.disposed.len(),
                                skipped = report.skipped_in_flight.len(),
                                orphans = report.orphans_removed,
                                "sweep complete"
                            );
                        }
                        Err(e) => error!(error = %e, "sweep failed"),
                    }
                }
            }
        }
    }

    /// Runs a single sweep as of `now`.
    ///
    /// Each session is claimed through the finalize gate before it is
    /// disposed, so neither a finalize nor a chunk write in flight is
    /// pulled out from under.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, StoreError> {
        let mut report = SweepReport::default();

        for session_id in self.store.stale_sessions(self.retention, now).await? {
            let Some(_guard) = self.gate.try_acquire(&session_id) else {
                debug!(session = %session_id, "skipping stale session, finalize or write in flight");
                report.skipped_in_flight.push(session_id);
                continue;
            };
            match self.store.dispose(&session_id).await {
                Ok(true) => {
                    info!(session = %session_id, "disposed idle session");
                    report.disposed.push(session_id);
                }
                Ok(false) => {}
                Err(e) => warn!(session = %session_id, error = %e, "failed to dispose idle session"),
            }
        }

        report.orphans_removed = self.remove_orphaned_merges().await?;
        Ok(report)
    }

    async fn remove_orphaned_merges(&self) -> Result<usize, StoreError> {
        let mut dir = match tokio::fs::read_dir(&self.assembly_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ASSEMBLING_EXT) {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(_guard) = self.gate.try_acquire(session_id) else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), "removed orphaned merged file");
                    removed += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove merged file"),
            }
        }
        Ok(removed)
    }
}

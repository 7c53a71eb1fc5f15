//! Concatenates a complete session's chunks and hands the result off.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use reelhub_protocol::FinalizeResponse;
use reelhub_session_store::{SessionStore, UploadSession};

use crate::error::{ApiError, ApiResult};
use crate::gate::FinalizeGate;
use crate::remote::RemoteStore;

/// Extension of merged files while they exist.
pub const ASSEMBLING_EXT: &str = "assembling";

/// Merged output path for a session inside `assembly_dir`.
pub fn assembly_path(assembly_dir: &Path, session_id: &str) -> PathBuf {
    assembly_dir.join(format!("{session_id}.{ASSEMBLING_EXT}"))
}

/// Removes the merged file when dropped.
struct AssemblyFile(PathBuf);

impl Drop for AssemblyFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.0.display(), error = %e, "failed to remove merged file");
        }
    }
}

/// Finalizes sessions: merge, verify, store remotely, dispose.
pub struct Reassembler {
    store: Arc<dyn SessionStore>,
    remote: Arc<dyn RemoteStore>,
    gate: FinalizeGate,
    assembly_dir: PathBuf,
}

impl Reassembler {
    pub fn new(
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteStore>,
        gate: FinalizeGate,
        assembly_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            remote,
            gate,
            assembly_dir: assembly_dir.into(),
        }
    }

    /// Runs the one finalize transition of a session.
    ///
    /// Nothing destructive happens unless every chunk is present. A remote
    /// store failure keeps the session so the caller can finalize again.
    pub async fn finalize(&self, session_id: &str) -> ApiResult<FinalizeResponse> {
        let _guard = self
            .gate
            .acquire(session_id)
            .await
            .ok_or_else(|| ApiError::FinalizeInProgress(session_id.to_string()))?;

        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or_else(|| ApiError::UnknownSession(session_id.to_string()))?;

        let (complete, missing) = self.store.all_chunks_present(session_id).await?;
        if !complete {
            info!(session = %session_id, missing = missing.len(), "finalize refused, chunks missing");
            return Err(ApiError::IncompleteUpload { missing });
        }

        tokio::fs::create_dir_all(&self.assembly_dir)
            .await
            .map_err(|e| ApiError::WriteFailure(e.to_string()))?;
        let merged = AssemblyFile(assembly_path(&self.assembly_dir, session_id));

        let written = self.merge(&session, &merged.0).await?;
        if written != session.declared_size {
            warn!(
                session = %session_id,
                declared = session.declared_size,
                written,
                "reassembled size differs from declared size, session kept"
            );
            return Err(ApiError::WriteFailure(format!(
                "merged {written} bytes, declared {}",
                session.declared_size
            )));
        }

        let stored = match self.remote.store(&merged.0, &session.file_name).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(session = %session_id, error = %e, "remote store failed, session kept");
                return Err(e.into());
            }
        };
        drop(merged);

        if let Err(e) = self.store.dispose(session_id).await {
            // The file is already stored; the sweeper retries the dispose later.
            error!(session = %session_id, error = %e, "failed to dispose finalized session");
        }

        info!(
            session = %session_id,
            public_id = %stored.public_id,
            size = stored.size,
            "upload finalized"
        );
        Ok(FinalizeResponse {
            url: stored.url,
            public_id: stored.public_id,
            size: stored.size,
        })
    }

    /// Writes chunks `0..total` in index order into `path`; returns bytes written.
    async fn merge(&self, session: &UploadSession, path: &Path) -> ApiResult<u64> {
        let write_err = |e: std::io::Error| ApiError::WriteFailure(e.to_string());

        let mut out = tokio::fs::File::create(path).await.map_err(write_err)?;
        let mut written = 0u64;
        for index in 0..session.total_chunks {
            let mut chunk = self.store.open_chunk(&session.session_id, index).await?;
            written += tokio::io::copy(&mut chunk, &mut out)
                .await
                .map_err(write_err)?;
        }
        out.flush().await.map_err(write_err)?;
        out.sync_all().await.map_err(write_err)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use reelhub_session_store::FsSessionStore;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    use crate::remote::{RemoteFuture, RemoteStoreError, StoredObject};

    /// Records stored bytes; can be told to fail or to block until released.
    #[derive(Default)]
    struct MockRemote {
        fail: AtomicBool,
        calls: AtomicUsize,
        stored: Mutex<Vec<Vec<u8>>>,
        hold: Option<Arc<Notify>>,
        entered: Option<Arc<Notify>>,
    }

    impl RemoteStore for MockRemote {
        fn store<'a>(&'a self, path: &'a Path, file_name: &'a str) -> RemoteFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some(entered) = &self.entered {
                    entered.notify_one();
                }
                if let Some(hold) = &self.hold {
                    hold.notified().await;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(RemoteStoreError::Rejected {
                        status: 503,
                        body: "unavailable".into(),
                    });
                }
                let data = tokio::fs::read(path).await?;
                let size = data.len() as u64;
                self.stored.lock().unwrap().push(data);
                Ok(StoredObject {
                    url: format!("https://media.test/{file_name}"),
                    public_id: file_name.to_string(),
                    size,
                })
            })
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<dyn SessionStore>,
        remote: Arc<MockRemote>,
        reassembler: Arc<Reassembler>,
        assembly_dir: PathBuf,
    }

    async fn fixture(remote: MockRemote) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn SessionStore> =
            Arc::new(FsSessionStore::open(dir.path().join("staging")).await.unwrap());
        let remote = Arc::new(remote);
        let assembly_dir = dir.path().join("assembly");
        let reassembler = Arc::new(Reassembler::new(
            Arc::clone(&store),
            Arc::clone(&remote) as Arc<dyn RemoteStore>,
            FinalizeGate::new(),
            &assembly_dir,
        ));
        Fixture {
            _dir: dir,
            store,
            remote,
            reassembler,
            assembly_dir,
        }
    }

    async fn put(store: &Arc<dyn SessionStore>, id: &str, index: u32, data: &[u8]) {
        store.stage_chunk(id, index, data).await.unwrap();
        store.record_chunk(id, index).await.unwrap();
    }

    fn assembly_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn out_of_order_chunks_reassemble_in_index_order() {
        let f = fixture(MockRemote::default()).await;
        let original: Vec<u8> = (0..103u8).collect();
        let s = f.store.init("movie.mp4", 103, 10).await.unwrap();

        for index in (0..s.total_chunks).rev() {
            let start = index as usize * 10;
            let end = (start + 10).min(original.len());
            put(&f.store, &s.session_id, index, &original[start..end]).await;
        }

        let resp = f.reassembler.finalize(&s.session_id).await.unwrap();
        assert_eq!(resp.size, 103);
        assert_eq!(resp.url, "https://media.test/movie.mp4");
        assert_eq!(f.remote.stored.lock().unwrap()[0], original);

        // Session and merged file are gone.
        assert!(f.store.get(&s.session_id).await.unwrap().is_none());
        assert!(assembly_is_empty(&f.assembly_dir));
    }

    #[tokio::test]
    async fn incomplete_lists_missing_and_keeps_session() {
        let f = fixture(MockRemote::default()).await;
        let s = f.store.init("movie.mp4", 100, 10).await.unwrap();
        for index in 0..4 {
            put(&f.store, &s.session_id, index, &[index as u8; 10]).await;
        }

        let err = f.reassembler.finalize(&s.session_id).await.unwrap_err();
        match err {
            ApiError::IncompleteUpload { missing } => assert_eq!(missing, vec![4, 5, 6, 7, 8, 9]),
            other => panic!("unexpected error: {other}"),
        }
        let status = f.store.status(&s.session_id).await.unwrap().unwrap();
        assert_eq!(status.received_count, 4);
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn twelve_byte_scenario() {
        let f = fixture(MockRemote::default()).await;
        let s = f.store.init("movie.mp4", 12, 5).await.unwrap();
        assert_eq!(s.total_chunks, 3);

        put(&f.store, &s.session_id, 0, b"AAAAA").await;
        put(&f.store, &s.session_id, 2, b"CC").await;
        let err = f.reassembler.finalize(&s.session_id).await.unwrap_err();
        assert!(matches!(err, ApiError::IncompleteUpload { ref missing } if missing == &[1]));

        put(&f.store, &s.session_id, 1, b"BBBBB").await;
        let resp = f.reassembler.finalize(&s.session_id).await.unwrap();
        assert_eq!(resp.size, 12);
        assert_eq!(f.remote.stored.lock().unwrap()[0], b"AAAAABBBBBCC");
    }

    #[tokio::test]
    async fn remote_failure_keeps_session_then_retry_succeeds() {
        let f = fixture(MockRemote::default()).await;
        f.remote.fail.store(true, Ordering::SeqCst);
        let s = f.store.init("movie.mp4", 6, 3).await.unwrap();
        put(&f.store, &s.session_id, 0, b"abc").await;
        put(&f.store, &s.session_id, 1, b"def").await;

        let err = f.reassembler.finalize(&s.session_id).await.unwrap_err();
        assert!(matches!(err, ApiError::RemoteStore(_)));
        assert!(f.store.get(&s.session_id).await.unwrap().is_some());
        assert!(assembly_is_empty(&f.assembly_dir));

        f.remote.fail.store(false, Ordering::SeqCst);
        let resp = f.reassembler.finalize(&s.session_id).await.unwrap();
        assert_eq!(resp.size, 6);
        assert!(f.store.get(&s.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_session() {
        let f = fixture(MockRemote::default()).await;
        let err = f.reassembler.finalize("nope").await.unwrap_err();
        assert!(matches!(err, ApiError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn concurrent_finalize_runs_once() {
        let hold = Arc::new(Notify::new());
        let entered = Arc::new(Notify::new());
        let f = fixture(MockRemote {
            hold: Some(Arc::clone(&hold)),
            entered: Some(Arc::clone(&entered)),
            ..Default::default()
        })
        .await;
        let s = f.store.init("movie.mp4", 4, 4).await.unwrap();
        put(&f.store, &s.session_id, 0, b"data").await;

        let first = {
            let reassembler = Arc::clone(&f.reassembler);
            let id = s.session_id.clone();
            tokio::spawn(async move { reassembler.finalize(&id).await })
        };

        // Wait until the first finalize is inside the remote store.
        entered.notified().await;
        let err = f.reassembler.finalize(&s.session_id).await.unwrap_err();
        assert!(matches!(err, ApiError::FinalizeInProgress(_)));

        hold.notify_one();
        let resp = first.await.unwrap().unwrap();
        assert_eq!(resp.size, 4);
        assert_eq!(f.remote.calls.load(Ordering::SeqCst), 1);
    }
}

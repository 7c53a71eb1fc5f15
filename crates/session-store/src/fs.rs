//! Filesystem-backed session store.
//!
//! Layout under the staging root:
//!
//! ```text
//! <root>/<session_id>/session.json
//! <root>/<session_id>/chunk-00000000.part
//! <root>/<session_id>/chunk-00000001.part
//! ```
//!
//! Every write goes to a temp file first and is renamed into place, so a
//! crash never leaves a half-written chunk or metadata file behind.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use reelhub_transfer::{total_chunks, validate_file_name};

use crate::StoreError;
use crate::session::{SessionStatus, UploadSession, new_session_id};
use crate::store::{ChunkStream, SessionStore, StoreFuture};

/// Metadata file name inside each session directory.
pub const SESSION_FILE: &str = "session.json";

/// Default ceiling on chunks per session. Status and finalize list chunk
/// indices, so this bounds their size.
pub const DEFAULT_MAX_TOTAL_CHUNKS: u32 = 100_000;

/// Staged file name for chunk `index`.
pub fn chunk_file_name(index: u32) -> String {
    format!("chunk-{index:08}.part")
}

struct SessionEntry {
    session: UploadSession,
    /// Set under the lock by `dispose` so writers holding a stale `Arc` back off.
    disposed: bool,
}

type EntryRef = Arc<Mutex<SessionEntry>>;

/// Session store keeping one directory per session under a staging root.
pub struct FsSessionStore {
    root: PathBuf,
    sessions: RwLock<HashMap<String, EntryRef>>,
    max_total_chunks: u32,
}

impl FsSessionStore {
    /// Opens (or creates) the staging root and reloads persisted sessions.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut sessions = HashMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let session_dir = entry.path();
            match load_session(&session_dir.join(SESSION_FILE)).await {
                Ok(session) if entry.file_name().to_str() == Some(session.session_id.as_str()) => {
                    sessions.insert(
                        session.session_id.clone(),
                        Arc::new(Mutex::new(SessionEntry {
                            session,
                            disposed: false,
                        })),
                    );
                }
                Ok(session) => {
                    warn!(
                        dir = %session_dir.display(),
                        session = %session.session_id,
                        "session id does not match its directory, skipping"
                    );
                }
                Err(StoreError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    // Leftover of an interrupted dispose.
                    warn!(dir = %session_dir.display(), "removing staging directory without metadata");
                    if let Err(e) = tokio::fs::remove_dir_all(&session_dir).await {
                        warn!(dir = %session_dir.display(), error = %e, "failed to remove directory");
                    }
                }
                Err(e) => {
                    warn!(dir = %session_dir.display(), error = %e, "skipping unreadable session");
                }
            }
        }

        info!(root = %root.display(), sessions = sessions.len(), "session store opened");
        Ok(Self {
            root,
            sessions: RwLock::new(sessions),
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
        })
    }

    /// Refuses new sessions that would need more than `max` chunks.
    pub fn with_max_total_chunks(mut self, max: u32) -> Self {
        self.max_total_chunks = max.max(1);
        self
    }

    /// Directory holding the metadata and chunks of one session.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    async fn entry(&self, session_id: &str) -> Result<EntryRef, StoreError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSession(session_id.to_string()))
    }

    async fn snapshot(&self, session_id: &str) -> Option<UploadSession> {
        let entry = self.entry(session_id).await.ok()?;
        let guard = entry.lock().await;
        (!guard.disposed).then(|| guard.session.clone())
    }
}

impl SessionStore for FsSessionStore {
    fn init<'a>(
        &'a self,
        file_name: &'a str,
        declared_size: i64,
        chunk_size: i64,
    ) -> StoreFuture<'a, UploadSession> {
        Box::pin(async move {
            if declared_size <= 0 {
                return Err(StoreError::InvalidSize(format!(
                    "file size must be positive, got {declared_size}"
                )));
            }
            if chunk_size <= 0 {
                return Err(StoreError::InvalidSize(format!(
                    "chunk size must be positive, got {chunk_size}"
                )));
            }
            validate_file_name(file_name)?;

            let declared_size = declared_size as u64;
            let chunk_size = chunk_size as u64;
            let total = u32::try_from(total_chunks(declared_size, chunk_size))
                .ok()
                .filter(|&total| total <= self.max_total_chunks)
                .ok_or_else(|| {
                    StoreError::InvalidSize(format!(
                        "{declared_size} bytes in chunks of {chunk_size} needs more than {} chunks",
                        self.max_total_chunks
                    ))
                })?;

            let now = Utc::now();
            let session = UploadSession {
                session_id: new_session_id(),
                file_name: file_name.to_string(),
                declared_size,
                chunk_size,
                total_chunks: total,
                received_chunks: Default::default(),
                created_at: now,
                updated_at: now,
            };

            let dir = self.session_dir(&session.session_id);
            tokio::fs::create_dir_all(&dir).await?;
            persist(&dir, &session).await?;

            self.sessions.write().await.insert(
                session.session_id.clone(),
                Arc::new(Mutex::new(SessionEntry {
                    session: session.clone(),
                    disposed: false,
                })),
            );

            info!(
                session = %session.session_id,
                file = %session.file_name,
                size = declared_size,
                chunk_size,
                total_chunks = total,
                "upload session created"
            );
            Ok(session)
        })
    }

    fn status<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<SessionStatus>> {
        Box::pin(async move { Ok(self.snapshot(session_id).await.map(|s| s.status())) })
    }

    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<UploadSession>> {
        Box::pin(async move { Ok(self.snapshot(session_id).await) })
    }

    fn list(&self) -> StoreFuture<'_, Vec<UploadSession>> {
        Box::pin(async move {
            let entries: Vec<EntryRef> = self.sessions.read().await.values().cloned().collect();
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                let guard = entry.lock().await;
                if !guard.disposed {
                    out.push(guard.session.clone());
                }
            }
            out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(out)
        })
    }

    fn stage_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let entry = self.entry(session_id).await?;
            let guard = entry.lock().await;
            live_session(&guard, session_id)?;
            check_index(&guard.session, index)?;

            let path = self.session_dir(session_id).join(chunk_file_name(index));
            write_atomic(&path, data).await?;
            debug!(session = %session_id, index, bytes = data.len(), "chunk staged");
            Ok(())
        })
    }

    fn record_chunk<'a>(&'a self, session_id: &'a str, index: u32) -> StoreFuture<'a, u32> {
        Box::pin(async move {
            let entry = self.entry(session_id).await?;
            let mut guard = entry.lock().await;
            live_session(&guard, session_id)?;
            check_index(&guard.session, index)?;

            let mut updated = guard.session.clone();
            let fresh = updated.received_chunks.insert(index);
            updated.updated_at = Utc::now();
            persist(&self.session_dir(session_id), &updated).await?;
            guard.session = updated;

            let count = guard.session.received_count();
            if fresh {
                debug!(session = %session_id, index, received = count, "chunk recorded");
            } else {
                debug!(session = %session_id, index, "chunk re-sent, count unchanged");
            }
            Ok(count)
        })
    }

    fn open_chunk<'a>(&'a self, session_id: &'a str, index: u32) -> StoreFuture<'a, ChunkStream> {
        Box::pin(async move {
            let entry = self.entry(session_id).await?;
            let guard = entry.lock().await;
            live_session(&guard, session_id)?;
            check_index(&guard.session, index)?;

            let path = self.session_dir(session_id).join(chunk_file_name(index));
            let file = tokio::fs::File::open(&path).await?;
            Ok(Box::pin(file) as ChunkStream)
        })
    }

    fn all_chunks_present<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, (bool, Vec<u32>)> {
        Box::pin(async move {
            let entry = self.entry(session_id).await?;
            let guard = entry.lock().await;
            live_session(&guard, session_id)?;
            let missing = guard.session.missing_chunks();
            Ok((missing.is_empty(), missing))
        })
    }

    fn dispose<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let Ok(entry) = self.entry(session_id).await else {
                return Ok(false);
            };
            let mut guard = entry.lock().await;
            if guard.disposed {
                return Ok(false);
            }

            // Metadata goes first: a directory without it never reloads.
            let dir = self.session_dir(session_id);
            match tokio::fs::remove_file(dir.join(SESSION_FILE)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            guard.disposed = true;
            self.sessions.write().await.remove(session_id);

            if let Err(e) = tokio::fs::remove_dir_all(&dir).await
                && e.kind() != ErrorKind::NotFound
            {
                warn!(
                    session = %session_id,
                    error = %e,
                    "staged chunks left behind, removed on next open"
                );
            }
            info!(session = %session_id, "upload session disposed");
            Ok(true)
        })
    }
}

fn live_session(entry: &SessionEntry, session_id: &str) -> Result<(), StoreError> {
    if entry.disposed {
        Err(StoreError::UnknownSession(session_id.to_string()))
    } else {
        Ok(())
    }
}

fn check_index(session: &UploadSession, index: u32) -> Result<(), StoreError> {
    if index >= session.total_chunks {
        return Err(StoreError::IndexOutOfRange {
            index,
            total: session.total_chunks,
        });
    }
    Ok(())
}

async fn load_session(path: &Path) -> Result<UploadSession, StoreError> {
    let data = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}

async fn persist(dir: &Path, session: &UploadSession) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(session)?;
    write_atomic(&dir.join(SESSION_FILE), &data).await
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn open_store(dir: &TempDir) -> FsSessionStore {
        FsSessionStore::open(dir.path()).await.unwrap()
    }

    async fn read_chunk(store: &FsSessionStore, id: &str, index: u32) -> Vec<u8> {
        let mut reader = store.open_chunk(id, index).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn init_computes_total_and_creates_staging() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let s = store.init("movie.mkv", 12, 5).await.unwrap();
        assert_eq!(s.total_chunks, 3);
        assert!(s.received_chunks.is_empty());
        assert!(store.session_dir(&s.session_id).join(SESSION_FILE).exists());

        let other = store.init("movie.mkv", 12, 5).await.unwrap();
        assert_ne!(s.session_id, other.session_id);
    }

    #[tokio::test]
    async fn init_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert!(matches!(
            store.init("a.mp4", 0, 5).await,
            Err(StoreError::InvalidSize(_))
        ));
        assert!(matches!(
            store.init("a.mp4", -1, 5).await,
            Err(StoreError::InvalidSize(_))
        ));
        assert!(matches!(
            store.init("a.mp4", 10, 0).await,
            Err(StoreError::InvalidSize(_))
        ));
        assert!(matches!(
            store.init("../a.mp4", 10, 5).await,
            Err(StoreError::InvalidFileName(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_caps_chunk_count() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        assert!(matches!(
            store.init("a.mp4", 4_000_000_000, 1).await,
            Err(StoreError::InvalidSize(_))
        ));
        assert!(store.list().await.unwrap().is_empty());

        let store = store.with_max_total_chunks(4);
        assert_eq!(store.init("a.mp4", 20, 5).await.unwrap().total_chunks, 4);
        assert!(matches!(
            store.init("a.mp4", 21, 5).await,
            Err(StoreError::InvalidSize(_))
        ));
    }

    #[tokio::test]
    async fn twelve_bytes_in_three_chunks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let s = store.init("movie.mkv", 12, 5).await.unwrap();
        let id = s.session_id.as_str();

        store.stage_chunk(id, 0, b"AAAAA").await.unwrap();
        assert_eq!(store.record_chunk(id, 0).await.unwrap(), 1);
        store.stage_chunk(id, 2, b"CC").await.unwrap();
        assert_eq!(store.record_chunk(id, 2).await.unwrap(), 2);

        let status = store.status(id).await.unwrap().unwrap();
        assert_eq!(status.received_count, 2);
        assert_eq!(status.received, vec![0, 2]);
        assert_eq!(status.missing, vec![1]);
        assert_eq!(store.all_chunks_present(id).await.unwrap(), (false, vec![1]));

        store.stage_chunk(id, 1, b"BBBBB").await.unwrap();
        assert_eq!(store.record_chunk(id, 1).await.unwrap(), 3);
        assert_eq!(store.all_chunks_present(id).await.unwrap(), (true, vec![]));
        assert_eq!(read_chunk(&store, id, 1).await, b"BBBBB");
    }

    #[tokio::test]
    async fn resend_overwrites_without_recounting() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let s = store.init("a.mp4", 10, 5).await.unwrap();
        let id = s.session_id.as_str();

        store.stage_chunk(id, 0, b"first").await.unwrap();
        assert_eq!(store.record_chunk(id, 0).await.unwrap(), 1);
        store.stage_chunk(id, 0, b"again").await.unwrap();
        assert_eq!(store.record_chunk(id, 0).await.unwrap(), 1);

        assert_eq!(read_chunk(&store, id, 0).await, b"again");
    }

    #[tokio::test]
    async fn out_of_range_and_unknown() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let s = store.init("a.mp4", 10, 5).await.unwrap();

        assert!(matches!(
            store.record_chunk(&s.session_id, 2).await,
            Err(StoreError::IndexOutOfRange { index: 2, total: 2 })
        ));
        assert!(matches!(
            store.stage_chunk(&s.session_id, 7, b"x").await,
            Err(StoreError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            store.record_chunk("nope", 0).await,
            Err(StoreError::UnknownSession(_))
        ));
        assert!(store.status("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dispose_removes_everything() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let s = store.init("a.mp4", 10, 5).await.unwrap();
        let id = s.session_id.as_str();
        store.stage_chunk(id, 0, b"12345").await.unwrap();
        store.record_chunk(id, 0).await.unwrap();

        assert!(store.dispose(id).await.unwrap());
        assert!(!store.session_dir(id).exists());
        assert!(store.status(id).await.unwrap().is_none());
        assert!(matches!(
            store.record_chunk(id, 1).await,
            Err(StoreError::UnknownSession(_))
        ));
        assert!(!store.dispose(id).await.unwrap());
    }

    #[tokio::test]
    async fn dispose_interrupted_after_metadata_stays_disposed() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir).await;
            let s = store.init("a.mp4", 10, 5).await.unwrap();
            store.stage_chunk(&s.session_id, 0, b"12345").await.unwrap();
            store.record_chunk(&s.session_id, 0).await.unwrap();
            s.session_id
        };

        // Crash after the first dispose step: metadata gone, chunks still staged.
        let session_dir = dir.path().join(&id);
        std::fs::remove_file(session_dir.join(SESSION_FILE)).unwrap();
        assert!(session_dir.join(chunk_file_name(0)).exists());

        let store = open_store(&dir).await;
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(!store.dispose(&id).await.unwrap());
        assert!(!session_dir.exists());
    }

    #[tokio::test]
    async fn sessions_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_store(&dir).await;
            let s = store.init("a.mp4", 10, 5).await.unwrap();
            store.stage_chunk(&s.session_id, 1, b"67890").await.unwrap();
            store.record_chunk(&s.session_id, 1).await.unwrap();
            s.session_id
        };

        // A directory without metadata is an interrupted dispose.
        std::fs::create_dir(dir.path().join("orphan")).unwrap();

        let store = open_store(&dir).await;
        let status = store.status(&id).await.unwrap().unwrap();
        assert_eq!(status.received, vec![1]);
        assert_eq!(status.missing, vec![0]);
        assert_eq!(read_chunk(&store, &id, 1).await, b"67890");
        assert!(!dir.path().join("orphan").exists());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resend_counts_once() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir).await);
        let s = store.init("a.mp4", 30, 10).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let id = s.session_id.clone();
            handles.push(tokio::spawn(async move {
                store.stage_chunk(&id, 1, b"0123456789").await.unwrap();
                store.record_chunk(&id, 1).await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap(), 1);
        }

        let status = store.status(&s.session_id).await.unwrap().unwrap();
        assert_eq!(status.received_count, 1);
        assert_eq!(read_chunk(&store, &s.session_id, 1).await, b"0123456789");
    }

    #[tokio::test]
    async fn stale_sessions_by_idle_time() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        let s = store.init("a.mp4", 10, 5).await.unwrap();

        let now = Utc::now();
        assert!(
            store
                .stale_sessions(Duration::hours(24), now)
                .await
                .unwrap()
                .is_empty()
        );
        let stale = store
            .stale_sessions(Duration::hours(24), now + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(stale, vec![s.session_id]);
    }
}

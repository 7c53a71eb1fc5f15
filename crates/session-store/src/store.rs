//! The session store contract.
//!
//! The upload server only depends on this trait, so the filesystem backend
//! can be swapped for a key-value store without touching request handling.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Duration, Utc};

use crate::StoreError;
use crate::session::{SessionStatus, UploadSession};

/// Boxed future returned by every [`SessionStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Async reader over one staged chunk.
pub type ChunkStream = Pin<Box<dyn tokio::io::AsyncRead + Send>>;

/// Persistent upload session bookkeeping.
///
/// Mutations of a single session are serialized by the implementation;
/// different sessions never block each other.
pub trait SessionStore: Send + Sync {
    /// Creates a session and its empty staging area.
    ///
    /// Fails with `InvalidSize` when either size is not positive or the
    /// session would need more chunks than the store allows, and with
    /// `InvalidFileName` when the name is not a plain file name.
    fn init<'a>(
        &'a self,
        file_name: &'a str,
        declared_size: i64,
        chunk_size: i64,
    ) -> StoreFuture<'a, UploadSession>;

    /// Received/missing snapshot, `None` for unknown sessions.
    fn status<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<SessionStatus>>;

    /// Full session record, `None` for unknown sessions.
    fn get<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<UploadSession>>;

    /// All live sessions.
    fn list(&self) -> StoreFuture<'_, Vec<UploadSession>>;

    /// Writes the bytes of chunk `index`, replacing any earlier copy.
    fn stage_chunk<'a>(
        &'a self,
        session_id: &'a str,
        index: u32,
        data: &'a [u8],
    ) -> StoreFuture<'a, ()>;

    /// Marks chunk `index` received and returns the received count.
    ///
    /// Recording an index twice leaves the count unchanged.
    fn record_chunk<'a>(&'a self, session_id: &'a str, index: u32) -> StoreFuture<'a, u32>;

    /// Opens a staged chunk for reading.
    fn open_chunk<'a>(&'a self, session_id: &'a str, index: u32) -> StoreFuture<'a, ChunkStream>;

    /// Whether every index is present, plus the missing indices.
    fn all_chunks_present<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, (bool, Vec<u32>)>;

    /// Removes the session and its staging files. Returns `false` if it did not exist.
    fn dispose<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, bool>;

    /// Ids of sessions idle for longer than `idle_for` at `now`.
    fn stale_sessions(
        &self,
        idle_for: Duration,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<String>> {
        Box::pin(async move {
            let sessions = self.list().await?;
            Ok(sessions
                .into_iter()
                .filter(|s| s.is_idle(idle_for, now))
                .map(|s| s.session_id)
                .collect())
        })
    }
}

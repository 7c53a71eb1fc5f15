//! Upload session bookkeeping.
//!
//! A session records which chunks of a declared file have arrived. The
//! [`SessionStore`] trait is the contract the upload server talks to;
//! [`FsSessionStore`] keeps one directory per session holding a
//! `session.json` plus the staged chunk files, so sessions survive restarts.

mod fs;
mod session;
mod store;

pub use fs::{DEFAULT_MAX_TOTAL_CHUNKS, FsSessionStore, SESSION_FILE, chunk_file_name};
pub use session::{SessionStatus, UploadSession, new_session_id};
pub use store::{ChunkStream, SessionStore, StoreFuture};

/// Errors produced by the session store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("upload session not found: {0}")]
    UnknownSession(String),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),
}

impl From<reelhub_transfer::TransferError> for StoreError {
    fn from(err: reelhub_transfer::TransferError) -> Self {
        use reelhub_transfer::TransferError;
        match err {
            TransferError::Io(e) => Self::Io(e),
            TransferError::InvalidFileName(msg) => Self::InvalidFileName(msg),
            TransferError::IndexOutOfRange { index, total } => {
                Self::IndexOutOfRange { index, total }
            }
            other => Self::InvalidSize(other.to_string()),
        }
    }
}

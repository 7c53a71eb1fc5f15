//! Client side of the chunked upload flow.
//!
//! The [`Uploader`] plans a file into chunks, sends them one at a time
//! through a [`ChunkTransport`] that retries transient failures, and
//! finalizes the session. Interrupted uploads resume from the chunks the
//! server already holds.
//!
//! # Pipeline
//!
//! 1. **Plan**: pick a chunk size from the file size tier
//! 2. **Init / resume**: open a session or query an existing one
//! 3. **Send**: sequential chunks with timeout, retry and backoff
//! 4. **Finalize**: server reassembles and stores the file

pub mod error;
pub mod http;
pub mod retry;
pub mod transport;
pub mod uploader;

// Re-export primary types for convenience.
pub use error::ClientError;
pub use http::HttpTransport;
pub use retry::{ChunkTransport, RetryPolicy};
pub use transport::{ChunkUpload, ProgressFn, TransportFuture, UploadTransport};
pub use uploader::{UploadEvent, UploadOptions, UploadReport, Uploader};

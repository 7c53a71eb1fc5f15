//! Upload transport trait.
//!
//! [`HttpTransport`](crate::HttpTransport) is the production implementation;
//! keeping the uploader behind a trait makes it testable with mocks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use reelhub_protocol::{
    ChunkAccepted, FinalizeResponse, InitUploadRequest, InitUploadResponse, StatusResponse,
};

use crate::error::ClientError;

/// Boxed future returned by every [`UploadTransport`] method.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ClientError>> + Send + 'a>>;

/// Called with the number of bytes of the current chunk handed to the network so far.
pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

/// One chunk ready to send. Cloning is cheap so retries can resend it.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    /// SHA-256 hex of `data`.
    pub checksum: Option<String>,
    pub data: Bytes,
}

/// The four upload API calls, one attempt each.
pub trait UploadTransport: Send + Sync {
    fn init<'a>(&'a self, req: &'a InitUploadRequest) -> TransportFuture<'a, InitUploadResponse>;

    fn status<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, StatusResponse>;

    fn send_chunk<'a>(
        &'a self,
        chunk: &'a ChunkUpload,
        progress: ProgressFn,
    ) -> TransportFuture<'a, ChunkAccepted>;

    fn finalize<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, FinalizeResponse>;
}

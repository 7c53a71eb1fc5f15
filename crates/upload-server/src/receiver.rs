//! Accepts one chunk at a time and records it against its session.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use reelhub_protocol::ChunkAccepted;
use reelhub_session_store::SessionStore;
use reelhub_transfer::verify_checksum;

use crate::error::{ApiError, ApiResult};
use crate::gate::FinalizeGate;

/// One decoded `POST /upload/chunk` request.
#[derive(Debug, Clone)]
pub struct IncomingChunk {
    pub session_id: String,
    pub index: u32,
    /// Client's view of the session total; checked when present.
    pub total_chunks: Option<u32>,
    /// SHA-256 hex of `data`; checked when present.
    pub checksum: Option<String>,
    pub data: Bytes,
}

/// Validates chunks, stages their bytes and updates the session.
pub struct ChunkReceiver {
    store: Arc<dyn SessionStore>,
    gate: FinalizeGate,
    max_chunk_size: u64,
}

impl ChunkReceiver {
    pub fn new(store: Arc<dyn SessionStore>, gate: FinalizeGate, max_chunk_size: u64) -> Self {
        Self {
            store,
            gate,
            max_chunk_size,
        }
    }

    /// Stores `chunk` and returns the updated received count.
    ///
    /// Re-sending an index overwrites the staged bytes; the count only
    /// grows the first time an index arrives.
    pub async fn receive(&self, chunk: IncomingChunk) -> ApiResult<ChunkAccepted> {
        let IncomingChunk {
            session_id,
            index,
            total_chunks,
            checksum,
            data,
        } = chunk;

        let session = self
            .store
            .get(&session_id)
            .await?
            .ok_or_else(|| ApiError::UnknownSession(session_id.clone()))?;

        // Held until the chunk is recorded; a finalize waits for it.
        let Some(_write) = self.gate.begin_write(&session_id) else {
            return Err(ApiError::FinalizeInProgress(session_id));
        };

        if index >= session.total_chunks {
            return Err(ApiError::IndexOutOfRange {
                index,
                total: session.total_chunks,
            });
        }

        if let Some(client_total) = total_chunks
            && client_total != session.total_chunks
        {
            return Err(ApiError::InvalidSize(format!(
                "totalChunks {client_total} does not match session total {}",
                session.total_chunks
            )));
        }

        if data.is_empty() {
            return Err(ApiError::BadRequest(format!("chunk {index} has no data")));
        }

        let size = data.len() as u64;
        let limit = session.chunk_size.min(self.max_chunk_size);
        if size > limit {
            return Err(ApiError::ChunkTooLarge { index, size, limit });
        }
        let expected = session.expected_chunk_len(index);
        if size != expected {
            return Err(ApiError::InvalidSize(format!(
                "chunk {index} is {size} bytes, expected {expected}"
            )));
        }

        if let Some(expected) = checksum.as_deref().filter(|c| !c.is_empty())
            && verify_checksum(&data, expected).is_err()
        {
            return Err(ApiError::ChecksumMismatch { index });
        }

        self.store.stage_chunk(&session_id, index, &data).await?;
        let received = self.store.record_chunk(&session_id, index).await?;

        debug!(
            session = %session_id,
            index,
            bytes = size,
            received,
            total = session.total_chunks,
            "chunk accepted"
        );

        Ok(ChunkAccepted {
            accepted: true,
            index,
            received_chunks: received,
            total_chunks: session.total_chunks,
        })
    }
}

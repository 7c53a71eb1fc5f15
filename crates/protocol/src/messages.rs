use serde::{Deserialize, Serialize};

use crate::constants::{ErrorCode, SESSION_NOT_FOUND_MESSAGE};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
///
/// Sizes are signed so that a negative value from a buggy client reaches
/// validation instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub file_name: String,
    pub file_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    pub chunk_size: i64,
}

/// Asks how many chunks of a session the server already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub session_id: String,
}

/// Triggers reassembly and hand-off of a complete session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub session_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Returned by `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub session_id: String,
    pub total_chunks: u32,
    pub chunk_size: u64,
}

/// Returned by `status`, also for unknown sessions (with `exists: false`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub session_id: String,
    pub exists: bool,
    pub existing_chunks: u32,
    pub total_chunks: u32,
    /// Session chunk size; a resuming client must slice with it. 0 when unknown.
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub received_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    /// Status for a session the server has never seen (or already disposed).
    pub fn not_found(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            exists: false,
            existing_chunks: 0,
            total_chunks: 0,
            chunk_size: 0,
            received_chunks: Vec::new(),
            missing_chunks: Vec::new(),
            message: Some(SESSION_NOT_FOUND_MESSAGE.to_string()),
        }
    }
}

/// Acknowledges a stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAccepted {
    pub accepted: bool,
    pub index: u32,
    pub received_chunks: u32,
    pub total_chunks: u32,
}

/// Returned by a successful `finalize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub url: String,
    pub public_id: String,
    pub size: u64,
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            missing_chunks: None,
        }
    }
}

/// Returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

use std::fmt;

use serde::{Deserialize, Serialize};

/// Route for creating a new upload session.
pub const ROUTE_INIT: &str = "/upload/init";

/// Route for querying how many chunks the server already holds.
pub const ROUTE_STATUS: &str = "/upload/status";

/// Route for sending one chunk (multipart).
pub const ROUTE_CHUNK: &str = "/upload/chunk";

/// Route for reassembling a complete session and handing it off.
pub const ROUTE_FINALIZE: &str = "/upload/finalize";

/// Liveness check.
pub const ROUTE_HEALTH: &str = "/health";

/// Multipart field names used by `POST /upload/chunk`.
pub mod fields {
    pub const SESSION_ID: &str = "sessionId";
    pub const INDEX: &str = "index";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const CHECKSUM: &str = "checksum";
    pub const CHUNK: &str = "chunk";
}

/// Message returned by `status` for sessions the server does not know.
pub const SESSION_NOT_FOUND_MESSAGE: &str = "upload session not found";

/// Machine-readable error code carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownSession,
    IndexOutOfRange,
    InvalidSize,
    InvalidFileName,
    ChecksumMismatch,
    ChunkTooLarge,
    BadRequest,
    IncompleteUpload,
    FinalizeInProgress,
    RemoteStoreError,
    WriteFailure,
    InternalError,
}

impl ErrorCode {
    /// Returns the snake_case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownSession => "unknown_session",
            Self::IndexOutOfRange => "index_out_of_range",
            Self::InvalidSize => "invalid_size",
            Self::InvalidFileName => "invalid_file_name",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::ChunkTooLarge => "chunk_too_large",
            Self::BadRequest => "bad_request",
            Self::IncompleteUpload => "incomplete_upload",
            Self::FinalizeInProgress => "finalize_in_progress",
            Self::RemoteStoreError => "remote_store_error",
            Self::WriteFailure => "write_failure",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_matches_serde_name() {
        let codes = [
            ErrorCode::UnknownSession,
            ErrorCode::IndexOutOfRange,
            ErrorCode::InvalidSize,
            ErrorCode::InvalidFileName,
            ErrorCode::ChecksumMismatch,
            ErrorCode::ChunkTooLarge,
            ErrorCode::BadRequest,
            ErrorCode::IncompleteUpload,
            ErrorCode::FinalizeInProgress,
            ErrorCode::RemoteStoreError,
            ErrorCode::WriteFailure,
            ErrorCode::InternalError,
        ];
        for code in codes {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn routes_share_upload_prefix() {
        for route in [ROUTE_INIT, ROUTE_STATUS, ROUTE_CHUNK, ROUTE_FINALIZE] {
            assert!(route.starts_with("/upload/"));
        }
    }
}

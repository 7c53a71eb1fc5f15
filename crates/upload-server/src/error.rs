//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use reelhub_protocol::{ErrorCode, ErrorResponse};
use reelhub_session_store::StoreError;

use crate::remote::RemoteStoreError;

/// Every failure a request handler can report.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("upload session not found: {0}")]
    UnknownSession(String),

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid file name: {0}")]
    InvalidFileName(String),

    #[error("checksum mismatch for chunk {index}")]
    ChecksumMismatch { index: u32 },

    #[error("chunk {index} is {size} bytes, limit is {limit}")]
    ChunkTooLarge { index: u32, size: u64, limit: u64 },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("upload incomplete: {} chunk(s) missing", missing.len())]
    IncompleteUpload { missing: Vec<u32> },

    #[error("finalize already in progress for session {0}")]
    FinalizeInProgress(String),

    #[error("remote store error: {0}")]
    RemoteStore(#[from] RemoteStoreError),

    #[error("write failure: {0}")]
    WriteFailure(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownSession(_) => ErrorCode::UnknownSession,
            Self::IndexOutOfRange { .. } => ErrorCode::IndexOutOfRange,
            Self::InvalidSize(_) => ErrorCode::InvalidSize,
            Self::InvalidFileName(_) => ErrorCode::InvalidFileName,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::ChunkTooLarge { .. } => ErrorCode::ChunkTooLarge,
            Self::BadRequest(_) => ErrorCode::BadRequest,
            Self::IncompleteUpload { .. } => ErrorCode::IncompleteUpload,
            Self::FinalizeInProgress(_) => ErrorCode::FinalizeInProgress,
            Self::RemoteStore(_) => ErrorCode::RemoteStoreError,
            Self::WriteFailure(_) => ErrorCode::WriteFailure,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::IndexOutOfRange { .. }
            | Self::InvalidSize(_)
            | Self::InvalidFileName(_)
            | Self::ChecksumMismatch { .. }
            | Self::ChunkTooLarge { .. }
            | Self::BadRequest(_)
            | Self::IncompleteUpload { .. } => StatusCode::BAD_REQUEST,
            Self::FinalizeInProgress(_) => StatusCode::CONFLICT,
            Self::RemoteStore(_) => StatusCode::BAD_GATEWAY,
            Self::WriteFailure(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wire body for this error.
    pub fn to_body(&self) -> ErrorResponse {
        let mut body = ErrorResponse::new(self.code(), self.to_string());
        if let Self::IncompleteUpload { missing } = self {
            body.missing_chunks = Some(missing.clone());
        }
        body
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownSession(id) => Self::UnknownSession(id),
            StoreError::IndexOutOfRange { index, total } => Self::IndexOutOfRange { index, total },
            StoreError::InvalidSize(msg) => Self::InvalidSize(msg),
            StoreError::InvalidFileName(msg) => Self::InvalidFileName(msg),
            StoreError::Io(e) => Self::WriteFailure(e.to_string()),
            StoreError::Json(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = %self.code(), "{self}");
        }
        (status, Json(self.to_body())).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

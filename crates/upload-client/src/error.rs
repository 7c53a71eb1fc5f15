//! Upload client error types.

use std::time::Duration;

use reelhub_protocol::{ErrorCode, ErrorResponse};

/// Errors produced while uploading.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] reelhub_transfer::TransferError),

    /// The server answered with a structured error body.
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: ErrorResponse },

    /// The server answered with something that is not an error body.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("chunk timed out after {0:?}")]
    Timeout(Duration),

    #[error("session {0} does not match the local file")]
    SessionMismatch(String),

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether another attempt could succeed.
    ///
    /// Network failures, timeouts, 5xx, 408 and 429 are transient. Every
    /// other 4xx (unknown session, bad index, bad size) will fail the same
    /// way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode() && !e.is_builder(),
            Self::Timeout(_) => true,
            Self::Server { status, .. } | Self::UnexpectedStatus { status, .. } => {
                retryable_status(*status)
            }
            _ => false,
        }
    }

    /// The server error code, if the server sent one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Server { body, .. } => Some(body.code),
            _ => None,
        }
    }

    /// Missing chunk indices reported by a refused finalize.
    pub fn missing_chunks(&self) -> Option<&[u32]> {
        match self {
            Self::Server { body, .. } if body.code == ErrorCode::IncompleteUpload => {
                body.missing_chunks.as_deref()
            }
            _ => None,
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

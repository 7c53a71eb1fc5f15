//! Wire types for the chunked upload HTTP API.
//!
//! Shared by the upload server (axum handlers) and the upload client
//! (reqwest transport) so both sides agree on field names and error codes.

pub mod constants;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::ErrorCode;
pub use messages::{
    ChunkAccepted, ErrorResponse, FinalizeRequest, FinalizeResponse, HealthResponse,
    InitUploadRequest, InitUploadResponse, StatusRequest, StatusResponse,
};

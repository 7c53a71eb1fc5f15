//! Chunked file transfer primitives: chunk planning, range reads with
//! checksums, progress math and file-name validation.
//!
//! Nothing in here touches the network. The upload client drives these
//! types over HTTP and the server reuses the checksum and validation helpers.

mod chunked;
mod planner;
mod progress;
mod validation;

pub use chunked::{Chunk, ChunkReader, checksum_bytes, verify_checksum};
pub use planner::{
    ChunkPlan, ChunkRange, ChunkSizePolicy, GIB, MIB, SizeTier, plan_chunks, total_chunks,
};
pub use progress::{SpeedCalculator, chunk_fraction, overall_fraction};
pub use validation::{MAX_FILE_NAME_LEN, validate_file_name};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("file of {file_size} bytes needs more than u32::MAX chunks of {chunk_size} bytes")]
    TooManyChunks { file_size: u64, chunk_size: u64 },

    #[error("chunk index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },

    #[error("file size changed: planned {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid file name: {0}")]
    InvalidFileName(String),
}

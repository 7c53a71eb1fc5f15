use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::planner::ChunkPlan;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Checks `data` against a hex SHA-256 digest (case-insensitive).
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), TransferError> {
    if checksum_bytes(data).eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(TransferError::ChecksumMismatch)
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One planned chunk read from disk.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: u32,
    /// Byte offset within the source file.
    pub offset: u64,
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads the planned ranges of a file by index.
///
/// Reads are random access so a resumed upload can skip chunks the server
/// already holds.
pub struct ChunkReader {
    file: std::fs::File,
    plan: ChunkPlan,
}

impl ChunkReader {
    /// Opens `path` and checks that its length still matches `plan`.
    pub fn open(path: &Path, plan: ChunkPlan) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let actual = file.metadata()?.len();
        if actual != plan.file_size {
            return Err(TransferError::SizeMismatch {
                expected: plan.file_size,
                actual,
            });
        }
        Ok(Self { file, plan })
    }

    /// Reads chunk `index` and computes its checksum.
    pub fn read_chunk(&mut self, index: u32) -> Result<Chunk, TransferError> {
        let range = self.plan.range(index)?;
        self.file.seek(SeekFrom::Start(range.offset))?;

        let mut data = vec![0u8; range.len as usize];
        self.file.read_exact(&mut data)?;

        let checksum = checksum_bytes(&data);
        Ok(Chunk {
            index,
            offset: range.offset,
            data,
            checksum,
        })
    }
}

use crate::TransferError;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// One gibibyte.
pub const GIB: u64 = 1024 * MIB;

/// Number of chunks needed to cover `file_size` bytes (ceiling division).
///
/// Returns 0 when `chunk_size` is 0.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    file_size.div_ceil(chunk_size)
}

/// Plans `file_size` with the default [`ChunkSizePolicy`].
pub fn plan_chunks(file_size: u64) -> Result<ChunkPlan, TransferError> {
    ChunkSizePolicy::default().plan(file_size)
}

/// A contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub offset: u64,
    pub len: u64,
}

impl ChunkRange {
    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Files strictly larger than `above` bytes use `chunk_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeTier {
    pub above: u64,
    pub chunk_size: u64,
}

/// Chunk size selection by file size tier.
///
/// Big files get small chunks so a failed attempt is cheap to retry; small
/// files get big chunks to keep the request count down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSizePolicy {
    /// Checked in order; the first tier whose threshold is exceeded wins.
    tiers: Vec<SizeTier>,
    fallback: u64,
}

impl Default for ChunkSizePolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                SizeTier {
                    above: 2 * GIB,
                    chunk_size: 2 * MIB,
                },
                SizeTier {
                    above: GIB,
                    chunk_size: 5 * MIB,
                },
                SizeTier {
                    above: 500 * MIB,
                    chunk_size: 10 * MIB,
                },
            ],
            fallback: 20 * MIB,
        }
    }
}

impl ChunkSizePolicy {
    /// Builds a custom policy. Tiers are sorted by descending threshold.
    pub fn new(mut tiers: Vec<SizeTier>, fallback: u64) -> Self {
        tiers.sort_by(|a, b| b.above.cmp(&a.above));
        Self { tiers, fallback }
    }

    /// Chunk size for a file of `file_size` bytes.
    pub fn chunk_size_for(&self, file_size: u64) -> u64 {
        self.tiers
            .iter()
            .find(|tier| file_size > tier.above)
            .map(|tier| tier.chunk_size)
            .unwrap_or(self.fallback)
    }

    /// Plans `file_size` using this policy's chunk size.
    pub fn plan(&self, file_size: u64) -> Result<ChunkPlan, TransferError> {
        ChunkPlan::with_chunk_size(file_size, self.chunk_size_for(file_size))
    }
}

/// The ordered byte ranges of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub file_size: u64,
    pub chunk_size: u64,
    pub ranges: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Slices `file_size` bytes into ranges of `chunk_size` (the last may be shorter).
    pub fn with_chunk_size(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize);
        }
        let count = total_chunks(file_size, chunk_size);
        if count > u64::from(u32::MAX) {
            return Err(TransferError::TooManyChunks {
                file_size,
                chunk_size,
            });
        }

        let ranges = (0..count as u32)
            .map(|index| {
                let offset = u64::from(index) * chunk_size;
                ChunkRange {
                    index,
                    offset,
                    len: chunk_size.min(file_size - offset),
                }
            })
            .collect();

        Ok(Self {
            file_size,
            chunk_size,
            ranges,
        })
    }

    pub fn total_chunks(&self) -> u32 {
        self.ranges.len() as u32
    }

    /// Returns the range for `index`.
    pub fn range(&self, index: u32) -> Result<ChunkRange, TransferError> {
        self.ranges
            .get(index as usize)
            .copied()
            .ok_or(TransferError::IndexOutOfRange {
                index,
                total: self.total_chunks(),
            })
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Generates a fresh session id: UTC timestamp plus a random suffix.
///
/// Only `[0-9a-f-]` characters, so the id is safe as a directory name.
pub fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        &suffix[..12]
    )
}

/// Persistent record of one in-progress upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    pub file_name: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default)]
    pub received_chunks: BTreeSet<u32>,
    pub created_at: DateTime<Utc>,
    /// Last time a chunk was recorded.
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn received_count(&self) -> u32 {
        self.received_chunks.len() as u32
    }

    /// Indices in `[0, total_chunks)` not yet received, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Byte length chunk `index` must have: `chunk_size` except for a shorter last chunk.
    pub fn expected_chunk_len(&self, index: u32) -> u64 {
        let offset = u64::from(index) * self.chunk_size;
        self.chunk_size.min(self.declared_size.saturating_sub(offset))
    }

    /// True when nothing has touched the session for longer than `idle_for`.
    pub fn is_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> bool {
        now - self.updated_at > idle_for
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.session_id.clone(),
            received_count: self.received_count(),
            total_chunks: self.total_chunks,
            chunk_size: self.chunk_size,
            received: self.received_chunks.iter().copied().collect(),
            missing: self.missing_chunks(),
        }
    }
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: String,
    pub received_count: u32,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
}

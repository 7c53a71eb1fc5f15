//! Application state shared across handlers.

use std::sync::Arc;

use reelhub_session_store::SessionStore;

use crate::gate::FinalizeGate;
use crate::reassembler::Reassembler;
use crate::receiver::ChunkReceiver;
use crate::remote::RemoteStore;

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SessionStore>,
    pub receiver: Arc<ChunkReceiver>,
    pub reassembler: Arc<Reassembler>,
    pub gate: FinalizeGate,
    /// Largest chunk size a session may declare.
    pub max_chunk_size: u64,
}

impl AppState {
    /// Wires receiver and reassembler around one store and one finalize gate.
    pub fn new(
        store: Arc<dyn SessionStore>,
        remote: Arc<dyn RemoteStore>,
        assembly_dir: impl Into<std::path::PathBuf>,
        max_chunk_size: u64,
    ) -> Self {
        let gate = FinalizeGate::new();
        let receiver = ChunkReceiver::new(Arc::clone(&store), gate.clone(), max_chunk_size);
        let reassembler = Reassembler::new(Arc::clone(&store), remote, gate.clone(), assembly_dir);
        Self {
            store,
            receiver: Arc::new(receiver),
            reassembler: Arc::new(reassembler),
            gate,
            max_chunk_size,
        }
    }
}

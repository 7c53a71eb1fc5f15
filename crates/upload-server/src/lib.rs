//! HTTP server side of the chunked upload flow.
//!
//! Chunks arrive one request at a time through [`ChunkReceiver`], are
//! staged in the session store, and once complete the [`Reassembler`]
//! merges them and hands the file to a [`RemoteStore`]. A background
//! [`Sweeper`] reclaims sessions that clients abandoned.

pub mod error;
mod gate;
mod handlers;
mod reassembler;
mod receiver;
pub mod remote;
mod routes;
mod server;
mod state;
mod sweeper;

pub use error::{ApiError, ApiResult};
pub use gate::{FinalizeGate, FinalizeGuard, WriteGuard};
pub use reassembler::{ASSEMBLING_EXT, Reassembler, assembly_path};
pub use receiver::{ChunkReceiver, IncomingChunk};
pub use remote::{
    HttpRemoteStore, LocalDirRemoteStore, RemoteFuture, RemoteStore, RemoteStoreError,
    StoredObject,
};
pub use routes::create_router;
pub use server::{ServerConfig, UploadServer};
pub use state::AppState;
pub use sweeper::{SweepReport, Sweeper};

/// Errors produced while starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session store error: {0}")]
    Store(#[from] reelhub_session_store::StoreError),
}

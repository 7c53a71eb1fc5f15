//! Upload HTTP server.
//!
//! Binds a TCP port, serves the upload API and runs the session sweeper
//! alongside it until shut down.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use reelhub_session_store::{DEFAULT_MAX_TOTAL_CHUNKS, FsSessionStore, SessionStore};
use reelhub_transfer::MIB;

use crate::ServerError;
use crate::remote::RemoteStore;
use crate::routes::create_router;
use crate::state::AppState;
use crate::sweeper::Sweeper;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// Root of the per-session staging directories.
    pub staging_dir: PathBuf,
    /// Where merged files live while being handed off.
    pub assembly_dir: PathBuf,
    /// Largest chunk size a session may declare.
    pub max_chunk_size: u64,
    /// Most chunks a single session may have.
    pub max_total_chunks: u32,
    /// Sessions idle longer than this are disposed by the sweeper.
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: ([127, 0, 0, 1], 0).into(),
            staging_dir: PathBuf::from("staging"),
            assembly_dir: PathBuf::from("assembly"),
            max_chunk_size: 20 * MIB,
            max_total_chunks: DEFAULT_MAX_TOTAL_CHUNKS,
            retention: chrono::Duration::hours(24),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// The upload server.
pub struct UploadServer {
    bind: SocketAddr,
    state: AppState,
    sweeper: Sweeper,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl UploadServer {
    /// Opens the session store and wires the server around `remote`.
    pub async fn new(
        config: ServerConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Self>, ServerError> {
        let store: Arc<dyn SessionStore> = Arc::new(
            FsSessionStore::open(&config.staging_dir)
                .await?
                .with_max_total_chunks(config.max_total_chunks),
        );
        tokio::fs::create_dir_all(&config.assembly_dir).await?;

        let state = AppState::new(
            Arc::clone(&store),
            remote,
            &config.assembly_dir,
            config.max_chunk_size,
        );
        let sweeper = Sweeper::new(
            store,
            state.gate.clone(),
            &config.assembly_dir,
            config.retention,
            config.sweep_interval,
        );

        Ok(Arc::new(Self {
            bind: config.bind,
            state,
            sweeper,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        }))
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("upload server listening on {local_addr}");

        let router = create_router(self.state.clone());
        let shutdown = self.cancel.clone();
        let serve = async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
        };

        let (served, ()) = tokio::join!(serve, self.sweeper.run(self.cancel.clone()));
        served?;

        tracing::info!("upload server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhub_protocol::constants::{
        ROUTE_CHUNK, ROUTE_FINALIZE, ROUTE_HEALTH, ROUTE_INIT, ROUTE_STATUS, fields,
    };
    use reelhub_protocol::{
        ChunkAccepted, ErrorCode, ErrorResponse, FinalizeResponse, HealthResponse,
        InitUploadResponse, StatusResponse,
    };
    use serde_json::json;
    use tempfile::TempDir;

    use crate::remote::LocalDirRemoteStore;

    struct Running {
        _dir: TempDir,
        server: Arc<UploadServer>,
        handle: tokio::task::JoinHandle<()>,
        base: String,
        media_dir: PathBuf,
        client: reqwest::Client,
    }

    impl Running {
        async fn stop(self) {
            self.server.shutdown();
            self.handle.await.unwrap();
        }

        fn url(&self, route: &str) -> String {
            format!("{}{route}", self.base)
        }

        async fn send_chunk(&self, session_id: &str, index: u32, data: &[u8]) -> reqwest::Response {
            let form = reqwest::multipart::Form::new()
                .text(fields::SESSION_ID, session_id.to_string())
                .text(fields::INDEX, index.to_string())
                .part(
                    fields::CHUNK,
                    reqwest::multipart::Part::bytes(data.to_vec()).file_name("chunk"),
                );
            self.client
                .post(self.url(ROUTE_CHUNK))
                .multipart(form)
                .send()
                .await
                .unwrap()
        }
    }

    async fn start() -> Running {
        let dir = TempDir::new().unwrap();
        let media_dir = dir.path().join("media");
        let config = ServerConfig {
            staging_dir: dir.path().join("staging"),
            assembly_dir: dir.path().join("assembly"),
            max_chunk_size: 1024,
            ..Default::default()
        };
        let remote = Arc::new(LocalDirRemoteStore::new(&media_dir, "http://media.test"));
        let server = UploadServer::new(config, remote).await.unwrap();

        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        let mut port = 0;
        for _ in 0..100 {
            port = server.port().await;
            if port > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(port > 0, "should have bound to a dynamic port");

        Running {
            _dir: dir,
            server,
            handle,
            base: format!("http://127.0.0.1:{port}"),
            media_dir,
            client: reqwest::Client::new(),
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let srv = start().await;
        let resp: HealthResponse = srv
            .client
            .get(srv.url(ROUTE_HEALTH))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(resp.status, "ok");
        srv.stop().await;
    }

    #[tokio::test]
    async fn full_upload_over_http() {
        let srv = start().await;

        let init: InitUploadResponse = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .json(&json!({"fileName": "clip.mp4", "fileSize": 12, "totalChunks": 3, "chunkSize": 5}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(init.total_chunks, 3);
        let id = init.session_id.as_str();

        for (index, data) in [(0u32, &b"AAAAA"[..]), (2, b"CC")] {
            let resp = srv.send_chunk(id, index, data).await;
            assert_eq!(resp.status(), 200);
            let ack: ChunkAccepted = resp.json().await.unwrap();
            assert!(ack.accepted);
        }

        let status: StatusResponse = srv
            .client
            .post(srv.url(ROUTE_STATUS))
            .json(&json!({"sessionId": id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(status.exists);
        assert_eq!(status.existing_chunks, 2);
        assert_eq!(status.missing_chunks, vec![1]);

        let resp = srv
            .client
            .post(srv.url(ROUTE_FINALIZE))
            .json(&json!({"sessionId": id}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::IncompleteUpload);
        assert_eq!(err.missing_chunks, Some(vec![1]));

        assert_eq!(srv.send_chunk(id, 1, b"BBBBB").await.status(), 200);

        let done: FinalizeResponse = srv
            .client
            .post(srv.url(ROUTE_FINALIZE))
            .json(&json!({"sessionId": id}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(done.size, 12);
        let stored = std::fs::read(srv.media_dir.join(&done.public_id)).unwrap();
        assert_eq!(stored, b"AAAAABBBBBCC");

        srv.stop().await;
    }

    #[tokio::test]
    async fn unknown_session_status_is_not_an_error() {
        let srv = start().await;
        let resp = srv
            .client
            .post(srv.url(ROUTE_STATUS))
            .json(&json!({"sessionId": "does-not-exist"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let status: StatusResponse = resp.json().await.unwrap();
        assert!(!status.exists);
        assert_eq!(status.existing_chunks, 0);
        assert_eq!(status.message.as_deref(), Some("upload session not found"));
        srv.stop().await;
    }

    #[tokio::test]
    async fn error_bodies_and_statuses() {
        let srv = start().await;

        let resp = srv.send_chunk("does-not-exist", 0, b"x").await;
        assert_eq!(resp.status(), 404);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::UnknownSession);

        let resp = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .json(&json!({"fileName": "a.mp4", "fileSize": 0, "chunkSize": 5}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::InvalidSize);

        let resp = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .json(&json!({"fileName": "a.mp4", "fileSize": 10, "totalChunks": 5, "chunkSize": 5}))
            .send()
            .await
            .unwrap();
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::InvalidSize);

        let resp = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .json(&json!({"fileName": "a.mp4", "fileSize": 10000, "chunkSize": 4096}))
            .send()
            .await
            .unwrap();
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::InvalidSize, "chunk size above server limit");

        let resp = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .json(&json!({"fileName": "a.mp4", "fileSize": 4_000_000_000u64, "chunkSize": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::InvalidSize, "too many chunks");

        let resp = srv
            .client
            .post(srv.url(ROUTE_INIT))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let err: ErrorResponse = resp.json().await.unwrap();
        assert_eq!(err.code, ErrorCode::BadRequest);

        let form = reqwest::multipart::Form::new().text(fields::INDEX, "0");
        let resp = srv
            .client
            .post(srv.url(ROUTE_CHUNK))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        srv.stop().await;
    }
}

//! Durable object storage the reassembled file is handed to.
//!
//! [`LocalDirRemoteStore`] copies into a directory and is meant for
//! development and tests. [`HttpRemoteStore`] streams the file as a
//! multipart upload to a media-hosting endpoint.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::Deserialize;
use tracing::{debug, info};

/// Result of a successful hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Permanent URL of the stored file.
    pub url: String,
    /// Backend identifier, usable for later deletion.
    pub public_id: String,
    pub size: u64,
}

/// Errors produced by a [`RemoteStore`].
#[derive(Debug, thiserror::Error)]
pub enum RemoteStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Boxed future returned by [`RemoteStore::store`].
pub type RemoteFuture<'a> =
    Pin<Box<dyn Future<Output = Result<StoredObject, RemoteStoreError>> + Send + 'a>>;

/// Accepts a local file and returns where it now lives permanently.
pub trait RemoteStore: Send + Sync {
    fn store<'a>(&'a self, path: &'a Path, file_name: &'a str) -> RemoteFuture<'a>;
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// Copies files into `dir` and serves them under `base_url`.
pub struct LocalDirRemoteStore {
    dir: PathBuf,
    base_url: String,
}

impl LocalDirRemoteStore {
    pub fn new(dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RemoteStore for LocalDirRemoteStore {
    fn store<'a>(&'a self, path: &'a Path, file_name: &'a str) -> RemoteFuture<'a> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await?;

            let id = uuid::Uuid::new_v4().simple().to_string();
            let public_id = format!("{}-{file_name}", &id[..16]);
            let dest = self.dir.join(&public_id);
            let size = tokio::fs::copy(path, &dest).await?;

            info!(public_id = %public_id, size, "stored in local directory");
            Ok(StoredObject {
                url: format!("{}/{public_id}", self.base_url),
                public_id,
                size,
            })
        })
    }
}

// ---------------------------------------------------------------------------
// HTTP media host
// ---------------------------------------------------------------------------

/// Uploads files to an HTTP endpoint as `multipart/form-data`.
///
/// The form carries a `file` part and, when configured, a `folder` text
/// field. The response must be JSON with `public_id` and either
/// `secure_url` or `url`.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    folder: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadReply {
    #[serde(default)]
    secure_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    public_id: String,
    #[serde(default)]
    bytes: Option<u64>,
}

impl HttpRemoteStore {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        folder: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            folder,
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    fn store<'a>(&'a self, path: &'a Path, file_name: &'a str) -> RemoteFuture<'a> {
        Box::pin(async move {
            let file = tokio::fs::File::open(path).await?;
            let len = file.metadata().await?.len();

            let stream = tokio_util::io::ReaderStream::new(file);
            let body = reqwest::Body::wrap_stream(stream);
            let part = reqwest::multipart::Part::stream_with_length(body, len)
                .file_name(file_name.to_string());

            let mut form = reqwest::multipart::Form::new().part("file", part);
            if let Some(folder) = &self.folder {
                form = form.text("folder", folder.clone());
            }

            let mut req = self.client.post(&self.endpoint).multipart(form);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            debug!(endpoint = %self.endpoint, file = %file_name, bytes = len, "uploading to remote store");
            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(RemoteStoreError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            let reply: UploadReply = resp.json().await?;
            let url = reply
                .secure_url
                .or(reply.url)
                .ok_or_else(|| RemoteStoreError::InvalidResponse("missing url".into()))?;

            info!(public_id = %reply.public_id, size = len, "stored in remote store");
            Ok(StoredObject {
                url,
                public_id: reply.public_id,
                size: reply.bytes.unwrap_or(len),
            })
        })
    }
}

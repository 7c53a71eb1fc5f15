//! reqwest implementation of [`UploadTransport`].

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use reelhub_protocol::constants::{
    ROUTE_CHUNK, ROUTE_FINALIZE, ROUTE_INIT, ROUTE_STATUS, fields,
};
use reelhub_protocol::{
    ChunkAccepted, ErrorResponse, FinalizeRequest, FinalizeResponse, InitUploadRequest,
    InitUploadResponse, StatusRequest, StatusResponse,
};

use crate::error::ClientError;
use crate::transport::{ChunkUpload, ProgressFn, TransportFuture, UploadTransport};

/// Size of the body slices a chunk is streamed in; progress ticks once per slice.
const BODY_SLICE: usize = 64 * 1024;

/// Talks to the upload server over HTTP.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://localhost:8080`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base_url)
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        route: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let resp = self.client.post(self.url(route)).json(body).send().await?;
        read_response(resp).await
    }
}

/// Decodes a success body, or turns a failure into [`ClientError::Server`].
async fn read_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => Err(ClientError::Server {
            status: status.as_u16(),
            body,
        }),
        Err(_) => Err(ClientError::UnexpectedStatus {
            status: status.as_u16(),
            body: text,
        }),
    }
}

/// Splits `data` into slices, reporting cumulative bytes as each slice is pulled.
fn progress_stream(
    data: Bytes,
    progress: ProgressFn,
) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let slices: Vec<Bytes> = (0..data.len())
        .step_by(BODY_SLICE)
        .map(|start| data.slice(start..(start + BODY_SLICE).min(data.len())))
        .collect();

    let mut sent = 0u64;
    futures_util::stream::iter(slices.into_iter().map(move |slice| {
        sent += slice.len() as u64;
        progress(sent);
        Ok(slice)
    }))
}

impl UploadTransport for HttpTransport {
    fn init<'a>(&'a self, req: &'a InitUploadRequest) -> TransportFuture<'a, InitUploadResponse> {
        Box::pin(async move { self.post_json(ROUTE_INIT, req).await })
    }

    fn status<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, StatusResponse> {
        Box::pin(async move {
            let req = StatusRequest {
                session_id: session_id.to_string(),
            };
            self.post_json(ROUTE_STATUS, &req).await
        })
    }

    fn send_chunk<'a>(
        &'a self,
        chunk: &'a ChunkUpload,
        progress: ProgressFn,
    ) -> TransportFuture<'a, ChunkAccepted> {
        Box::pin(async move {
            let len = chunk.data.len() as u64;
            let part = reqwest::multipart::Part::stream_with_length(
                reqwest::Body::wrap_stream(progress_stream(chunk.data.clone(), progress)),
                len,
            )
            .file_name(format!("chunk-{}", chunk.index));

            let mut form = reqwest::multipart::Form::new()
                .text(fields::SESSION_ID, chunk.session_id.clone())
                .text(fields::INDEX, chunk.index.to_string())
                .text(fields::TOTAL_CHUNKS, chunk.total_chunks.to_string());
            if let Some(checksum) = &chunk.checksum {
                form = form.text(fields::CHECKSUM, checksum.clone());
            }
            form = form.part(fields::CHUNK, part);

            debug!(session = %chunk.session_id, index = chunk.index, bytes = len, "sending chunk");
            let resp = self
                .client
                .post(self.url(ROUTE_CHUNK))
                .multipart(form)
                .send()
                .await?;
            read_response(resp).await
        })
    }

    fn finalize<'a>(&'a self, session_id: &'a str) -> TransportFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            let req = FinalizeRequest {
                session_id: session_id.to_string(),
            };
            self.post_json(ROUTE_FINALIZE, &req).await
        })
    }
}

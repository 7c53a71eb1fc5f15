//! Upload API handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use bytes::Bytes;
use tracing::info;

use reelhub_protocol::constants::fields;
use reelhub_protocol::{
    ChunkAccepted, FinalizeRequest, FinalizeResponse, HealthResponse, InitUploadRequest,
    InitUploadResponse, StatusRequest, StatusResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::receiver::IncomingChunk;
use crate::state::AppState;

/// Unwraps a JSON body, turning axum's rejection into our error body.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e.body_text())))
}

/// POST /upload/init - Create a new upload session.
#[tracing::instrument(skip_all)]
pub async fn init_upload(
    State(state): State<AppState>,
    body: Result<Json<InitUploadRequest>, JsonRejection>,
) -> ApiResult<Json<InitUploadResponse>> {
    let req = json_body(body)?;

    if req.chunk_size > 0 && req.chunk_size as u64 > state.max_chunk_size {
        return Err(ApiError::InvalidSize(format!(
            "chunk size {} exceeds server limit {}",
            req.chunk_size, state.max_chunk_size
        )));
    }

    // The store computes the authoritative total; a disagreeing client is rejected.
    if let Some(client_total) = req.total_chunks
        && req.file_size > 0
        && req.chunk_size > 0
    {
        let expected =
            reelhub_transfer::total_chunks(req.file_size as u64, req.chunk_size as u64);
        if u64::from(client_total) != expected {
            return Err(ApiError::InvalidSize(format!(
                "totalChunks {client_total} does not match ceil({} / {}) = {expected}",
                req.file_size, req.chunk_size
            )));
        }
    }

    let session = state
        .store
        .init(&req.file_name, req.file_size, req.chunk_size)
        .await?;

    Ok(Json(InitUploadResponse {
        session_id: session.session_id,
        total_chunks: session.total_chunks,
        chunk_size: session.chunk_size,
    }))
}

/// POST /upload/status - Report which chunks the server holds.
///
/// Unknown sessions are not an error: the response says `exists: false`.
pub async fn upload_status(
    State(state): State<AppState>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let req = json_body(body)?;

    let resp = match state.store.status(&req.session_id).await? {
        Some(status) => StatusResponse {
            session_id: status.session_id,
            exists: true,
            existing_chunks: status.received_count,
            total_chunks: status.total_chunks,
            chunk_size: status.chunk_size,
            received_chunks: status.received,
            missing_chunks: status.missing,
            message: None,
        },
        None => StatusResponse::not_found(req.session_id),
    };
    Ok(Json(resp))
}

/// POST /upload/chunk - Receive one chunk as multipart form data.
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut form: Multipart,
) -> ApiResult<Json<ChunkAccepted>> {
    let mut session_id = None;
    let mut index = None;
    let mut total_chunks = None;
    let mut checksum = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            fields::CHUNK => {
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?,
                );
            }
            fields::SESSION_ID => session_id = Some(field_text(field).await?),
            fields::INDEX => index = Some(parse_u32(fields::INDEX, &field_text(field).await?)?),
            fields::TOTAL_CHUNKS => {
                let text = field_text(field).await?;
                if !text.is_empty() {
                    total_chunks = Some(parse_u32(fields::TOTAL_CHUNKS, &text)?);
                }
            }
            fields::CHECKSUM => checksum = Some(field_text(field).await?),
            _ => {}
        }
    }

    let chunk = IncomingChunk {
        session_id: session_id.ok_or_else(|| missing_field(fields::SESSION_ID))?,
        index: index.ok_or_else(|| missing_field(fields::INDEX))?,
        total_chunks,
        checksum,
        data: data.ok_or_else(|| missing_field(fields::CHUNK))?,
    };

    Ok(Json(state.receiver.receive(chunk).await?))
}

/// POST /upload/finalize - Reassemble and hand the file to remote storage.
pub async fn finalize_upload(
    State(state): State<AppState>,
    body: Result<Json<FinalizeRequest>, JsonRejection>,
) -> ApiResult<Json<FinalizeResponse>> {
    let req = json_body(body)?;
    info!(session = %req.session_id, "finalize requested");
    Ok(Json(state.reassembler.finalize(&req.session_id).await?))
}

/// GET /health - Liveness check.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map(|t| t.trim().to_string())
        .map_err(|e| ApiError::BadRequest(format!("failed to read field {name}: {e}")))
}

fn parse_u32(name: &str, value: &str) -> ApiResult<u32> {
    value
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("field {name} is not a valid index: {value:?}")))
}

fn missing_field(name: &str) -> ApiError {
    ApiError::BadRequest(format!("missing multipart field {name}"))
}

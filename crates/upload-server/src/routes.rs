//! Route configuration.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use reelhub_protocol::constants::{
    ROUTE_CHUNK, ROUTE_FINALIZE, ROUTE_HEALTH, ROUTE_INIT, ROUTE_STATUS,
};

use crate::handlers;
use crate::state::AppState;

/// Room for multipart boundaries and the small text fields around a chunk.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let chunk_limit = usize::try_from(state.max_chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(ROUTE_HEALTH, get(handlers::health_check))
        .route(ROUTE_INIT, post(handlers::init_upload))
        .route(ROUTE_STATUS, post(handlers::upload_status))
        .route(
            ROUTE_CHUNK,
            post(handlers::upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        )
        .route(ROUTE_FINALIZE, post(handlers::finalize_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

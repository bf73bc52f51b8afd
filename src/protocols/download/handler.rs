//! Download protocol handler.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::stream::filler_stream;
use crate::server::AppState;

/// Handle `GET /download`.
///
/// Streams filler for the configured duration. The response has no length;
/// it ends when the duration elapses or the client goes away.
pub async fn download(State(state): State<AppState>) -> Response {
    let config = state.config.download();
    debug!(
        duration_secs = config.duration.as_secs_f64(),
        chunk_size = config.chunk_size,
        "Download session started"
    );

    let body = Body::from_stream(filler_stream(state.filler.clone(), &config));

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

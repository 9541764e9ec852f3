use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use screen_stream_common::buffer::LatestFrameCell;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

const NO_IMAGE: &str = "No image available";

/// Answers every path and method with the most recent snapshot.
pub fn router(cell: Arc<LatestFrameCell>) -> Router {
    Router::new()
        .fallback(latest_snapshot)
        .layer(TraceLayer::new_for_http())
        .with_state(cell)
}

async fn latest_snapshot(
    State(cell): State<Arc<LatestFrameCell>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Response {
    match cell.latest() {
        Some(frame) => {
            debug!(peer = %peer, %uri, seq = frame.seq, bytes = frame.payload_size(), "serving snapshot");
            (
                StatusCode::OK,
                [(CONTENT_TYPE, frame.content_type())],
                frame.payload_bytes().clone(),
            )
                .into_response()
        }
        None => {
            debug!(peer = %peer, %uri, "no snapshot captured yet");
            (StatusCode::OK, [(CONTENT_TYPE, "text/plain")], NO_IMAGE).into_response()
        }
    }
}

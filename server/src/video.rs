use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use screen_stream_common::buffer::{DeliveryMode, FrameBuffer};
use screen_stream_common::config::{BufferConfig, StreamMode, VideoConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::client::{ClientStream, Framing, MULTIPART_CONTENT_TYPE};

#[derive(Debug, Clone)]
pub struct VideoSettings {
    pub mode: StreamMode,
    pub delivery: DeliveryMode,
    pub poll_interval: Duration,
    pub raw_content_type: String,
}

impl VideoSettings {
    pub fn from_config(buffer: &BufferConfig, video: &VideoConfig) -> Self {
        Self {
            mode: video.mode,
            delivery: buffer.delivery,
            poll_interval: buffer.poll_interval(),
            raw_content_type: video.raw_content_type.clone(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self::from_config(&BufferConfig::default(), &VideoConfig::default())
    }
}

struct VideoState {
    buffer: Arc<FrameBuffer>,
    settings: VideoSettings,
    shutdown: CancellationToken,
    next_client_id: AtomicU64,
}

/// `/video_feed` streams the buffer; every other path is a 404.
pub fn router(
    buffer: Arc<FrameBuffer>,
    settings: VideoSettings,
    shutdown: CancellationToken,
) -> Router {
    let state = Arc::new(VideoState {
        buffer,
        settings,
        shutdown,
        next_client_id: AtomicU64::new(0),
    });

    Router::new()
        .route("/video_feed", any(video_feed))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn video_feed(
    State(state): State<Arc<VideoState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed);
    let settings = &state.settings;
    info!(client_id, peer = %peer, mode = ?settings.mode, "received /video_feed request");

    let (framing, content_type) = match settings.mode {
        StreamMode::Mjpeg => (Framing::Multipart, MULTIPART_CONTENT_TYPE),
        StreamMode::Raw => (Framing::Raw, settings.raw_content_type.as_str()),
    };
    let reader = state.buffer.reader(settings.delivery, settings.poll_interval);
    let client = ClientStream::new(client_id, peer, framing, reader, state.shutdown.clone());

    (
        StatusCode::OK,
        [(CONTENT_TYPE, content_type.to_string())],
        Body::from_stream(client.into_body_stream()),
    )
        .into_response()
}

async fn not_found(ConnectInfo(peer): ConnectInfo<SocketAddr>, uri: Uri) -> impl IntoResponse {
    debug!(peer = %peer, %uri, "no route");
    (StatusCode::NOT_FOUND, [(CONTENT_TYPE, "text/plain")], "Not Found")
}

use screen_stream_capture::{
    CaptureError, CaptureLoop, CaptureProvider, CropRect, Encoding, FrameCodec, SessionRequest,
    TargetSurface,
};
use screen_stream_common::buffer::{FrameBuffer, LatestFrameCell};
use screen_stream_common::config::{Config, StreamMode, VideoConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::server::StreamServer;
use crate::snapshot;
use crate::video::{self, VideoSettings};

/// The running capture loop and the HTTP servers reading from it.
pub struct Pipeline {
    capture: CaptureLoop,
    servers: Vec<StreamServer>,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Starts the enabled servers, then capture from a session begun with `provider`.
    ///
    /// A server whose port cannot be bound is left out; everything else keeps
    /// running. Only a capture failure fails the whole start.
    pub async fn start(config: &Config, provider: &dyn CaptureProvider) -> Result<Self, CaptureError> {
        let buffer = Arc::new(FrameBuffer::new(config.buffer.capacity));
        let latest = Arc::new(LatestFrameCell::new());
        let shutdown = CancellationToken::new();

        let mut servers = Vec::new();
        if config.video.enabled {
            if raw_mode_mislabels_jpeg(&config.video) {
                warn!(
                    content_type = %config.video.raw_content_type,
                    "raw video mode relays the capture loop's JPEG frames under a non-JPEG content type"
                );
            }
            let token = shutdown.child_token();
            let settings = VideoSettings::from_config(&config.buffer, &config.video);
            let router = video::router(Arc::clone(&buffer), settings, token.clone());
            servers.extend(start_server("video", config.video.port, router, token).await);
        }
        if config.snapshot.enabled {
            let token = shutdown.child_token();
            let router = snapshot::router(Arc::clone(&latest));
            servers.extend(start_server("snapshot", config.snapshot.port, router, token).await);
        }

        let codec = FrameCodec::with_crop(config.capture.crop.map(CropRect::from));
        let mut capture = CaptureLoop::new(codec, config.capture.tick_interval());
        if config.video.enabled {
            let encoding = Encoding::Jpeg {
                quality: config.video.jpeg_quality,
            };
            capture = capture.with_output(encoding, buffer);
        }
        if config.snapshot.enabled {
            capture = capture.with_output(Encoding::SNAPSHOT, latest);
        }

        let request = SessionRequest::from_config(&config.capture, TargetSurface::default());
        let started = provider
            .begin(&request)
            .and_then(|session| capture.start(session));
        if let Err(e) = started {
            shutdown.cancel();
            for server in servers {
                server.stop().await;
            }
            return Err(e);
        }

        Ok(Self {
            capture,
            servers,
            shutdown,
        })
    }

    pub fn servers(&self) -> &[StreamServer] {
        &self.servers
    }

    /// Stops capture first, then every server.
    pub async fn stop(self) {
        let mut capture = self.capture;
        // Joining the capture thread blocks.
        if let Err(e) = tokio::task::spawn_blocking(move || capture.stop()).await {
            error!(error = %e, "capture loop did not stop cleanly");
        }
        self.shutdown.cancel();
        for server in self.servers {
            let (name, addr) = (server.name(), server.local_addr());
            server.stop().await;
            info!(server = name, addr = %addr, "server shut down");
        }
    }
}

async fn start_server(
    name: &'static str,
    port: u16,
    router: axum::Router,
    shutdown: CancellationToken,
) -> Option<StreamServer> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match StreamServer::start(name, addr, router, shutdown).await {
        Ok(server) => Some(server),
        Err(e) => {
            error!(server = name, error = %e, "server disabled");
            None
        }
    }
}

/// The bundled capture loop only feeds JPEGs into the video buffer.
fn raw_mode_mislabels_jpeg(video: &VideoConfig) -> bool {
    video.mode == StreamMode::Raw && video.raw_content_type != "image/jpeg"
}

use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long `stop` waits for connections to wind down before aborting.
const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

/// One HTTP listener serving one router.
///
/// The shutdown token must be the one the router's streams watch, so that
/// stopping the server also ends every in-flight stream.
pub struct StreamServer {
    name: &'static str,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamServer {
    pub async fn start(
        name: &'static str,
        addr: SocketAddr,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let signal = shutdown.clone();
        let handle = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
            {
                error!(server = name, error = %e, "server terminated with error");
            }
        });

        info!(server = name, addr = %local_addr, "HTTP server listening");
        Ok(Self {
            name,
            local_addr,
            shutdown,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let mut handle = self.handle;
        match tokio::time::timeout(STOP_GRACE, &mut handle).await {
            Ok(_) => info!(server = self.name, "HTTP server stopped"),
            Err(_) => {
                warn!(server = self.name, "HTTP server did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::{self, VideoSettings};
    use screen_stream_common::buffer::FrameBuffer;
    use screen_stream_common::frame::EncodedFrame;
    use std::sync::Arc;

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();

        let result =
            StreamServer::start("test", addr, Router::new(), CancellationToken::new()).await;
        match result {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("bind should fail while the port is taken"),
        }
    }

    #[tokio::test]
    async fn stop_ends_live_streams() {
        let buffer = Arc::new(FrameBuffer::new(10));
        let token = CancellationToken::new();
        let router = video::router(Arc::clone(&buffer), VideoSettings::default(), token.clone());
        let server = StreamServer::start("video", "127.0.0.1:0".parse().unwrap(), router, token)
            .await
            .unwrap();

        let mut response = reqwest::get(format!("http://{}/video_feed", server.local_addr()))
            .await
            .unwrap();
        buffer.publish(EncodedFrame::jpeg_now(b"live".to_vec(), 0));
        let first = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap();
        assert!(first.is_some());

        tokio::time::timeout(Duration::from_secs(10), server.stop())
            .await
            .expect("stop should not hang on open streams");

        // The stream terminates instead of waiting for more frames.
        let rest = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match response.chunk().await {
                    Ok(Some(_)) => continue,
                    Ok(None) | Err(_) => break,
                }
            }
        })
        .await;
        assert!(rest.is_ok(), "client stream still open after stop");
    }
}

use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use screen_stream_common::buffer::FrameReader;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Written before every JPEG in a multipart stream.
pub const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
/// Written after every JPEG. There is no closing boundary.
pub const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One `multipart/x-mixed-replace` part per frame.
    Multipart,
    /// Payload bytes back to back.
    Raw,
}

impl Framing {
    pub fn frame(self, payload: &Bytes) -> Bytes {
        match self {
            Framing::Multipart => multipart_part(payload),
            Framing::Raw => payload.clone(),
        }
    }
}

pub fn multipart_part(payload: &[u8]) -> Bytes {
    let mut part = BytesMut::with_capacity(PART_HEADER.len() + payload.len() + PART_TRAILER.len());
    part.extend_from_slice(PART_HEADER);
    part.extend_from_slice(payload);
    part.extend_from_slice(PART_TRAILER);
    part.freeze()
}

/// Per-connection bookkeeping, logged when the connection goes away.
struct ClientSession {
    id: u64,
    peer: SocketAddr,
    framing: Framing,
    frames_sent: u64,
    bytes_sent: u64,
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        info!(
            client_id = self.id,
            peer = %self.peer,
            framing = ?self.framing,
            frames = self.frames_sent,
            bytes = self.bytes_sent,
            "client stream closed"
        );
    }
}

/// Turns the frames of one [`FrameReader`] into HTTP body chunks for one client.
///
/// Ends when the server's shutdown token fires. A disconnecting client drops
/// the body, and with it this stream; neither affects other clients.
pub struct ClientStream {
    session: ClientSession,
    reader: FrameReader,
    shutdown: CancellationToken,
}

impl ClientStream {
    pub fn new(
        id: u64,
        peer: SocketAddr,
        framing: Framing,
        reader: FrameReader,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            client_id = id,
            peer = %peer,
            framing = ?framing,
            delivery = ?reader.mode(),
            "client stream opened"
        );
        Self {
            session: ClientSession {
                id,
                peer,
                framing,
                frames_sent: 0,
                bytes_sent: 0,
            },
            reader,
            shutdown,
        }
    }

    /// Next framed chunk, or `None` once the server is shutting down.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        let frame = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                debug!(client_id = self.session.id, "server shutting down, ending client stream");
                return None;
            }
            frame = self.reader.next() => frame,
        };

        let chunk = self.session.framing.frame(frame.payload_bytes());
        self.session.frames_sent += 1;
        self.session.bytes_sent += chunk.len() as u64;
        debug!(
            client_id = self.session.id,
            seq = frame.seq,
            bytes = chunk.len(),
            "sending frame"
        );
        Some(chunk)
    }

    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        futures_util::stream::unfold(self, |mut client| async move {
            let chunk = client.next_chunk().await?;
            Some((Ok(chunk), client))
        })
    }
}

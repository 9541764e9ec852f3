//! Capture side of the pipeline: pulls raw frames from an injected capture
//! session, encodes them and publishes the results into frame sinks.

pub mod capture_loop;
pub mod codec;
pub mod pattern;
pub mod session;

pub use capture_loop::{CaptureLoop, LoopStatus};
pub use codec::{CodecError, CropRect, Encoding, FrameCodec};
pub use session::{CaptureProvider, CaptureSession, SessionRequest, TargetSurface};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed to begin capture session: {0}")]
    Begin(String),
    #[error("failed to acquire frame: {0}")]
    Acquire(String),
    #[error("capture loop cannot start from state {0:?}")]
    NotIdle(LoopStatus),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

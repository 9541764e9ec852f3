use screen_stream_common::config::CaptureConfig;
use screen_stream_common::frame::{PixelFormat, RawFrame};

use crate::CaptureError;

/// Drawable surface the session renders captured frames into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSurface {
    pub format: PixelFormat,
    /// Images the surface may hold before the oldest is recycled.
    pub max_images: usize,
}

impl Default for TargetSurface {
    fn default() -> Self {
        Self {
            format: PixelFormat::Rgba8888,
            max_images: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub surface: TargetSurface,
}

impl SessionRequest {
    pub fn from_config(config: &CaptureConfig, surface: TargetSurface) -> Self {
        Self {
            width: config.width,
            height: config.height,
            density_dpi: config.density_dpi,
            surface,
        }
    }
}

/// An authorized, live capture handle.
///
/// Sessions expose only the latest frame: anything the source produced
/// between two calls to [`acquire_latest_frame`](Self::acquire_latest_frame)
/// is dropped.
pub trait CaptureSession: Send {
    /// Returns `Ok(None)` when no frame is available yet.
    fn acquire_latest_frame(&mut self) -> Result<Option<RawFrame>, CaptureError>;

    /// Ends the session. Called once, after the last acquire.
    fn release(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Starts capture sessions on behalf of an already-authorized caller.
pub trait CaptureProvider {
    fn begin(&self, request: &SessionRequest) -> Result<Box<dyn CaptureSession>, CaptureError>;
}

use screen_stream_common::frame::{PixelFormat, RawFrame};
use tracing::debug;

use crate::session::{CaptureProvider, CaptureSession, SessionRequest};
use crate::CaptureError;

/// Rows are padded to this many bytes, like typical GPU surfaces.
const ROW_ALIGNMENT: usize = 64;
const BAR_WIDTH: u32 = 32;

/// Synthetic capture source: a colour gradient with a bar sweeping across it.
///
/// Stands in for an OS capture backend so the binary can serve a stream
/// anywhere. Frames are RGBA with row padding.
#[derive(Debug, Default)]
pub struct TestPatternProvider;

impl CaptureProvider for TestPatternProvider {
    fn begin(&self, request: &SessionRequest) -> Result<Box<dyn CaptureSession>, CaptureError> {
        if request.width == 0 || request.height == 0 {
            return Err(CaptureError::Begin(format!(
                "invalid size {}x{}",
                request.width, request.height
            )));
        }
        if request.surface.format != PixelFormat::Rgba8888 {
            return Err(CaptureError::Begin(format!(
                "test pattern only renders Rgba8888, surface wants {:?}",
                request.surface.format
            )));
        }
        debug!(
            width = request.width,
            height = request.height,
            density_dpi = request.density_dpi,
            "test pattern session started"
        );
        Ok(Box::new(TestPatternSession::new(request.width, request.height)))
    }
}

pub struct TestPatternSession {
    width: u32,
    height: u32,
    row_stride: usize,
    frame_index: u32,
    released: bool,
}

impl TestPatternSession {
    pub fn new(width: u32, height: u32) -> Self {
        let tight = width as usize * 4;
        let row_stride = tight.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT;
        Self {
            width,
            height,
            row_stride,
            frame_index: 0,
            released: false,
        }
    }

    fn render(&self) -> Vec<u8> {
        let mut data = vec![0u8; self.row_stride * self.height as usize];
        let bar_x = self.frame_index.wrapping_mul(4) % self.width.max(1);
        for y in 0..self.height {
            let row = &mut data[y as usize * self.row_stride..][..self.width as usize * 4];
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let x = x as u32;
                let in_bar = x >= bar_x && x < bar_x + BAR_WIDTH;
                let color = if in_bar {
                    [255, 255, 255, 255]
                } else {
                    [
                        (x * 255 / self.width) as u8,
                        (y * 255 / self.height) as u8,
                        (self.frame_index % 256) as u8,
                        255,
                    ]
                };
                pixel.copy_from_slice(&color);
            }
        }
        data
    }
}

impl CaptureSession for TestPatternSession {
    fn acquire_latest_frame(&mut self) -> Result<Option<RawFrame>, CaptureError> {
        if self.released {
            return Err(CaptureError::Acquire("session already released".into()));
        }
        let frame = RawFrame::packed(
            self.render(),
            self.width,
            self.height,
            self.row_stride,
            PixelFormat::Rgba8888,
        );
        self.frame_index = self.frame_index.wrapping_add(1);
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn name(&self) -> &str {
        "test-pattern"
    }
}

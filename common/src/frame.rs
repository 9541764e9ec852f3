use bytes::Bytes;
use std::fmt;

/// Pixel layout of a raw capture plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Bgra8888,
    /// 16-bit little-endian 5:6:5.
    Rgb565,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Bgra8888 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }
}

/// One plane of a raw frame.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Bytes,
    /// Bytes between the starts of consecutive rows, padding included.
    pub row_stride: usize,
    /// Bytes between consecutive pixels of a row.
    pub pixel_stride: usize,
}

/// A frame as handed over by the capture session.
///
/// Only lives for one capture tick. Whatever the session attached with
/// [`RawFrame::on_release`] runs when the frame is dropped, so the underlying
/// image goes back to the session on every path out of the tick.
pub struct RawFrame {
    pub planes: Vec<Plane>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl RawFrame {
    pub fn new(planes: Vec<Plane>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            planes,
            width,
            height,
            format,
            release: None,
        }
    }

    /// Single-plane frame, the common case for RGBA capture surfaces.
    pub fn packed(
        data: impl Into<Bytes>,
        width: u32,
        height: u32,
        row_stride: usize,
        format: PixelFormat,
    ) -> Self {
        let plane = Plane {
            data: data.into(),
            row_stride,
            pixel_stride: format.bytes_per_pixel(),
        };
        Self::new(vec![plane], width, height, format)
    }

    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFrame")
            .field("planes", &self.planes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Compressed bytes carried by an [`EncodedFrame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Jpeg(Bytes),
    Png(Bytes),
    /// H.264 access unit in Annex B format, relayed as-is by the raw stream.
    H264(Bytes),
}

impl FramePayload {
    pub fn bytes(&self) -> &Bytes {
        match self {
            FramePayload::Jpeg(data) | FramePayload::Png(data) | FramePayload::H264(data) => data,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            FramePayload::Jpeg(_) => "image/jpeg",
            FramePayload::Png(_) => "image/png",
            FramePayload::H264(_) => "video/h264",
        }
    }
}

/// An encoded frame with capture metadata.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub payload: FramePayload,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl EncodedFrame {
    pub fn new(payload: FramePayload, captured_at_ms: i64, seq: u64) -> Self {
        Self {
            payload,
            captured_at_ms,
            seq,
        }
    }

    /// JPEG frame stamped with the current time.
    pub fn jpeg_now(data: impl Into<Bytes>, seq: u64) -> Self {
        Self::new(
            FramePayload::Jpeg(data.into()),
            chrono::Utc::now().timestamp_millis(),
            seq,
        )
    }

    /// Returns the JPEG data if this is a JPEG frame.
    pub fn jpeg_data(&self) -> Option<&[u8]> {
        match &self.payload {
            FramePayload::Jpeg(data) => Some(data),
            _ => None,
        }
    }

    pub fn payload_bytes(&self) -> &Bytes {
        self.payload.bytes()
    }

    pub fn payload_size(&self) -> usize {
        self.payload.bytes().len()
    }

    pub fn content_type(&self) -> &'static str {
        self.payload.content_type()
    }
}

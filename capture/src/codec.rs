use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{imageops, DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use screen_stream_common::config::CropConfig;
use screen_stream_common::frame::{FramePayload, PixelFormat, RawFrame};

/// Output compression for one capture output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Jpeg { quality: u8 },
    /// Lossless; used for snapshots.
    Png,
}

impl Encoding {
    /// JPEG at quality 80, the MJPEG stream default.
    pub const VIDEO: Encoding = Encoding::Jpeg { quality: 80 };
    pub const SNAPSHOT: Encoding = Encoding::Png;
}

/// Sub-rectangle of the unpacked image to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<CropConfig> for CropRect {
    fn from(c: CropConfig) -> Self {
        Self {
            x: c.x,
            y: c.y,
            width: c.width,
            height: c.height,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("expected exactly one plane, got {0}")]
    PlaneCount(usize),
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("invalid stride for width {width}: row_stride {row_stride}, pixel_stride {pixel_stride}")]
    InvalidStride {
        width: u32,
        row_stride: usize,
        pixel_stride: usize,
    },
    #[error("pixel buffer too short: got {got} bytes, expected at least {expected}")]
    BufferTooShort { got: usize, expected: usize },
    #[error("crop {crop:?} does not fit a {width}x{height} image")]
    CropOutOfBounds { crop: CropRect, width: u32, height: u32 },
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Turns strided raw frames into JPEG or PNG payloads.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    crop: Option<CropRect>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` keeps the full frame.
    pub fn with_crop(crop: Option<CropRect>) -> Self {
        Self { crop }
    }

    pub fn encode(&self, raw: &RawFrame, encoding: Encoding) -> Result<FramePayload, CodecError> {
        let image = self.unpack(raw)?;
        let mut out = Vec::with_capacity(image.as_raw().len() / 8);
        match encoding {
            Encoding::Jpeg { quality } => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgba8(image).into_rgb8();
                JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )?;
                Ok(FramePayload::Jpeg(Bytes::from(out)))
            }
            Encoding::Png => {
                PngEncoder::new(&mut out).write_image(
                    image.as_raw(),
                    image.width(),
                    image.height(),
                    ExtendedColorType::Rgba8,
                )?;
                Ok(FramePayload::Png(Bytes::from(out)))
            }
        }
    }

    /// Rebuilds a tightly packed RGBA image from the strided plane, then crops it.
    ///
    /// The plane is read as an image [`packed_width`] pixels wide, so row
    /// padding becomes extra columns on the right which the default crop
    /// (the frame's own width and height) cuts off again.
    pub fn unpack(&self, raw: &RawFrame) -> Result<RgbaImage, CodecError> {
        let [plane] = raw.planes.as_slice() else {
            return Err(CodecError::PlaneCount(raw.planes.len()));
        };
        if raw.width == 0 || raw.height == 0 {
            return Err(CodecError::InvalidDimensions {
                width: raw.width,
                height: raw.height,
            });
        }

        let invalid_stride = || CodecError::InvalidStride {
            width: raw.width,
            row_stride: plane.row_stride,
            pixel_stride: plane.pixel_stride,
        };
        if plane.pixel_stride < raw.format.bytes_per_pixel() {
            return Err(invalid_stride());
        }
        let packed_width = packed_width(raw.width, plane.row_stride, plane.pixel_stride)
            .ok_or_else(invalid_stride)?;
        let expected = (packed_width as usize)
            .checked_mul(plane.pixel_stride)
            .and_then(|row| row.checked_mul(raw.height as usize))
            .ok_or_else(invalid_stride)?;
        if plane.data.len() < expected {
            return Err(CodecError::BufferTooShort {
                got: plane.data.len(),
                expected,
            });
        }

        let mut rgba = Vec::with_capacity(packed_width as usize * raw.height as usize * 4);
        for pixel in plane.data[..expected].chunks_exact(plane.pixel_stride) {
            rgba.extend_from_slice(&to_rgba(raw.format, pixel));
        }
        let full = RgbaImage::from_raw(packed_width, raw.height, rgba).ok_or(
            CodecError::BufferTooShort {
                got: plane.data.len(),
                expected,
            },
        )?;

        let crop = self.crop.unwrap_or(CropRect {
            x: 0,
            y: 0,
            width: raw.width,
            height: raw.height,
        });
        let fits = crop.width > 0
            && crop.height > 0
            && crop.x.checked_add(crop.width).is_some_and(|right| right <= packed_width)
            && crop.y.checked_add(crop.height).is_some_and(|bottom| bottom <= raw.height);
        if !fits {
            return Err(CodecError::CropOutOfBounds {
                crop,
                width: packed_width,
                height: raw.height,
            });
        }
        if crop.x == 0 && crop.y == 0 && crop.width == packed_width && crop.height == raw.height {
            return Ok(full);
        }
        Ok(imageops::crop_imm(&full, crop.x, crop.y, crop.width, crop.height).to_image())
    }
}

/// Width of the image the strided buffer is read as: `width + rowPadding / pixelStride`.
///
/// When the padding is not a whole number of pixels the remainder is dropped,
/// so later rows drift left by those bytes. Kept as-is for compatibility with
/// existing capture sources.
///
/// `None` when the row is narrower than `width` pixels, `pixel_stride` is zero,
/// or the result does not fit a `u32`.
pub fn packed_width(width: u32, row_stride: usize, pixel_stride: usize) -> Option<u32> {
    let row_bytes = pixel_stride.checked_mul(width as usize)?;
    let row_padding = row_stride.checked_sub(row_bytes)?;
    let padding_pixels = u32::try_from(row_padding.checked_div(pixel_stride)?).ok()?;
    width.checked_add(padding_pixels)
}

fn to_rgba(format: PixelFormat, px: &[u8]) -> [u8; 4] {
    match format {
        PixelFormat::Rgba8888 => [px[0], px[1], px[2], px[3]],
        PixelFormat::Bgra8888 => [px[2], px[1], px[0], px[3]],
        PixelFormat::Rgb565 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            let r = ((v >> 11) & 0x1F) as u8;
            let g = ((v >> 5) & 0x3F) as u8;
            let b = (v & 0x1F) as u8;
            [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xFF]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use screen_stream_common::frame::Plane;

    /// RGBA frame where pixel (x, y) is `[x, y, 7, 255]` and padding bytes are 0xEE.
    fn padded_rgba(width: u32, height: u32, row_stride: usize) -> RawFrame {
        let mut data = vec![0xEE; row_stride * height as usize];
        for y in 0..height as usize {
            for x in 0..width as usize {
                let i = y * row_stride + x * 4;
                data[i..i + 4].copy_from_slice(&[x as u8, y as u8, 7, 255]);
            }
        }
        RawFrame::packed(data, width, height, row_stride, PixelFormat::Rgba8888)
    }

    #[test]
    fn packed_width_follows_padding_formula() {
        assert_eq!(packed_width(10, 40, 4), Some(10));
        assert_eq!(packed_width(10, 48, 4), Some(12));
        // 6 bytes of padding is one and a half pixels; the half is dropped.
        assert_eq!(packed_width(10, 46, 4), Some(11));
    }

    #[test]
    fn packed_width_rejects_impossible_strides() {
        assert_eq!(packed_width(10, 36, 4), None);
        assert_eq!(packed_width(10, 40, 0), None);
        assert_eq!(packed_width(1, 1usize << 34, 4), None);
        assert_eq!(packed_width(1, usize::MAX, 4), None);
    }

    #[test]
    fn oversized_stride_is_a_codec_error() {
        for row_stride in [1usize << 34, usize::MAX] {
            let raw = RawFrame::packed(vec![0u8; 64], 1, 1, row_stride, PixelFormat::Rgba8888);
            assert!(matches!(
                FrameCodec::new().unpack(&raw),
                Err(CodecError::InvalidStride { .. })
            ));
            assert!(FrameCodec::new().encode(&raw, Encoding::VIDEO).is_err());
        }
    }

    #[test]
    fn unpack_strips_row_padding() {
        let raw = padded_rgba(5, 3, 32);
        let image = FrameCodec::new().unpack(&raw).unwrap();
        assert_eq!(image.dimensions(), (5, 3));
        assert_eq!(image.get_pixel(4, 2).0, [4, 2, 7, 255]);
        assert_eq!(image.get_pixel(0, 1).0, [0, 1, 7, 255]);
    }

    #[test]
    fn unpack_applies_crop() {
        let raw = padded_rgba(8, 6, 32);
        let codec = FrameCodec::with_crop(Some(CropRect { x: 2, y: 3, width: 4, height: 2 }));
        let image = codec.unpack(&raw).unwrap();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(0, 0).0, [2, 3, 7, 255]);
        assert_eq!(image.get_pixel(3, 1).0, [5, 4, 7, 255]);
    }

    #[test]
    fn bgra_and_rgb565_convert_to_rgba() {
        let bgra = RawFrame::packed(vec![10, 20, 30, 40], 1, 1, 4, PixelFormat::Bgra8888);
        assert_eq!(FrameCodec::new().unpack(&bgra).unwrap().get_pixel(0, 0).0, [30, 20, 10, 40]);

        // Pure red and pure blue in 5:6:5.
        let red = 0xF800u16.to_le_bytes();
        let blue = 0x001Fu16.to_le_bytes();
        let rgb565 = RawFrame::packed(
            vec![red[0], red[1], blue[0], blue[1]],
            2,
            1,
            4,
            PixelFormat::Rgb565,
        );
        let image = FrameCodec::new().unpack(&rgb565).unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn jpeg_output_has_soi_marker_and_frame_size() {
        let raw = padded_rgba(16, 8, 80);
        let payload = FrameCodec::new().encode(&raw, Encoding::VIDEO).unwrap();
        let FramePayload::Jpeg(data) = payload else {
            panic!("expected a JPEG payload");
        };
        assert_eq!(&data[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn png_output_is_lossless() {
        let raw = padded_rgba(6, 4, 32);
        let payload = FrameCodec::new().encode(&raw, Encoding::SNAPSHOT).unwrap();
        let FramePayload::Png(data) = payload else {
            panic!("expected a PNG payload");
        };
        assert_eq!(&data[..4], &[0x89, 0x50, 0x4E, 0x47]);
        let decoded = image::load_from_memory(&data).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (6, 4));
        assert_eq!(decoded.get_pixel(5, 3).0, [5, 3, 7, 255]);
    }

    #[test]
    fn rejects_wrong_plane_count() {
        let mut raw = padded_rgba(2, 2, 8);
        raw.planes.push(raw.planes[0].clone());
        assert!(matches!(
            FrameCodec::new().unpack(&raw),
            Err(CodecError::PlaneCount(2))
        ));

        let empty = RawFrame::new(Vec::new(), 2, 2, PixelFormat::Rgba8888);
        assert!(matches!(
            FrameCodec::new().encode(&empty, Encoding::VIDEO),
            Err(CodecError::PlaneCount(0))
        ));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let raw = RawFrame::packed(vec![0u8; 16], 0, 2, 8, PixelFormat::Rgba8888);
        assert!(matches!(
            FrameCodec::new().unpack(&raw),
            Err(CodecError::InvalidDimensions { width: 0, height: 2 })
        ));
    }

    #[test]
    fn rejects_stride_narrower_than_row() {
        let raw = RawFrame::packed(vec![0u8; 64], 4, 2, 8, PixelFormat::Rgba8888);
        assert!(matches!(
            FrameCodec::new().unpack(&raw),
            Err(CodecError::InvalidStride { .. })
        ));

        let plane = Plane {
            data: vec![0u8; 64].into(),
            row_stride: 16,
            pixel_stride: 0,
        };
        let zero_pixel_stride = RawFrame::new(vec![plane], 4, 2, PixelFormat::Rgba8888);
        assert!(matches!(
            FrameCodec::new().unpack(&zero_pixel_stride),
            Err(CodecError::InvalidStride { .. })
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        let raw = RawFrame::packed(vec![0u8; 20], 2, 3, 8, PixelFormat::Rgba8888);
        assert!(matches!(
            FrameCodec::new().unpack(&raw),
            Err(CodecError::BufferTooShort { got: 20, expected: 24 })
        ));
    }

    #[test]
    fn rejects_crop_outside_image() {
        let raw = padded_rgba(4, 4, 16);
        let codec = FrameCodec::with_crop(Some(CropRect { x: 2, y: 0, width: 4, height: 4 }));
        assert!(matches!(
            codec.unpack(&raw),
            Err(CodecError::CropOutOfBounds { width: 4, height: 4, .. })
        ));

        let empty = FrameCodec::with_crop(Some(CropRect { x: 0, y: 0, width: 0, height: 4 }));
        assert!(empty.unpack(&raw).is_err());
    }
}

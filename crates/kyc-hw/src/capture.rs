//! Selfie snapshot: encode the current frame as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;

use crate::Frame;

/// JPEG quality used for the selfie (0.8 on a 0–1 scale).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGB8")]
    BadBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("empty frame")]
    Empty,
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Encode an RGB8 frame as JPEG. `quality` is clamped to 1..=100.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CaptureError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(CaptureError::Empty);
    }
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.data.len() != expected {
        return Err(CaptureError::BadBuffer {
            width: frame.width,
            height: frame.height,
            expected,
            actual: frame.data.len(),
        });
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(&frame.data, frame.width, frame.height, ExtendedColorType::Rgb8)?;

    tracing::debug!(
        sequence = frame.sequence,
        width = frame.width,
        height = frame.height,
        bytes = out.len(),
        "frame encoded as jpeg"
    );
    Ok(out)
}

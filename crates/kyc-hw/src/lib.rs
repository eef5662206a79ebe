//! Capture devices for the liveness session.
//!
//! Camera access and face-mesh extraction are external collaborators. This
//! crate defines the two seams the session drives — [`FrameSource`] and
//! [`LandmarkExtractor`] — plus the JPEG snapshot used for the selfie and a
//! file-backed replay pair for running sessions without a webcam.

pub mod capture;
pub mod replay;

use std::path::PathBuf;

use kyc_core::Landmark;
use thiserror::Error;

pub use capture::{encode_jpeg, CaptureError, DEFAULT_JPEG_QUALITY};
pub use replay::{Recording, ReplayCamera, ReplayExtractor};

/// One RGB8 video frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic index of the frame within its source.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 pixels, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Uniform grey frame, used where a source has no pixels to offer.
    pub fn blank(sequence: u64, width: u32, height: u32) -> Self {
        Self {
            sequence,
            width,
            height,
            data: vec![128; (width * height * 3) as usize],
        }
    }
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera not found: {0}")]
    NotFound(PathBuf),
    #[error("camera source exhausted after {0} frames")]
    Exhausted(u64),
    #[error("camera released")]
    Released,
    #[error("invalid recording at line {line}: {source}")]
    InvalidRecording {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode frame image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("camera I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CameraError {
    /// Whether asking the user and trying again can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CameraError::PermissionDenied)
    }
}

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("landmark extractor failed to initialize: {0}")]
    Init(String),
    #[error("landmark extraction failed on frame {sequence}: {reason}")]
    Frame { sequence: u64, reason: String },
    #[error("landmark extractor closed")]
    Closed,
}

/// A source of video frames, e.g. a webcam.
///
/// `capture_frame` may block until the next frame is available.
pub trait FrameSource: Send {
    fn capture_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop the stream and give the device back. Must be idempotent.
    fn release(&mut self);
}

/// A face-mesh extractor. Returns zero or more faces per frame, each a
/// positional list of normalized landmarks.
pub trait LandmarkExtractor: Send {
    fn extract(&mut self, frame: &Frame) -> Result<Vec<Vec<Landmark>>, ExtractorError>;

    /// Free the model. Must be idempotent.
    fn close(&mut self);
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        (**self).capture_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

impl<T: LandmarkExtractor + ?Sized> LandmarkExtractor for Box<T> {
    fn extract(&mut self, frame: &Frame) -> Result<Vec<Vec<Landmark>>, ExtractorError> {
        (**self).extract(frame)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

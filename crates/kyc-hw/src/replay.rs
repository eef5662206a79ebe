//! Recorded sessions: a landmark stream captured earlier, replayed as a
//! camera plus extractor pair.
//!
//! A recording is a JSON-lines file, one object per video frame:
//!
//! ```text
//! {"image": "frames/0001.jpg", "faces": [[{"x":0.5,"y":0.5,"z":0.0}, ...]]}
//! {"faces": []}
//! ```
//!
//! `image` is optional and resolved relative to the recording file; frames
//! without one are replayed as a blank 640×480 canvas. `faces` holds the
//! extractor output for that frame.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kyc_core::Landmark;
use serde::{Deserialize, Serialize};

use crate::{CameraError, ExtractorError, Frame, FrameSource, LandmarkExtractor};

const BLANK_WIDTH: u32 = 640;
const BLANK_HEIGHT: u32 = 480;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordedFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub faces: Vec<Vec<Landmark>>,
}

/// A parsed recording, shared by the replay camera and extractor.
#[derive(Debug)]
pub struct Recording {
    base_dir: PathBuf,
    frames: Vec<RecordedFrame>,
}

impl Recording {
    /// Parse a JSON-lines recording. Blank lines are skipped.
    pub fn load(path: &Path) -> Result<Arc<Self>, CameraError> {
        if !path.exists() {
            return Err(CameraError::NotFound(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;

        let mut frames = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let frame: RecordedFrame = serde_json::from_str(line)
                .map_err(|source| CameraError::InvalidRecording { line: i + 1, source })?;
            frames.push(frame);
        }

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::info!(path = %path.display(), frames = frames.len(), "recording loaded");

        Ok(Arc::new(Self { base_dir, frames }))
    }

    /// Build a recording from frames held in memory.
    pub fn from_frames(frames: Vec<RecordedFrame>) -> Arc<Self> {
        Arc::new(Self {
            base_dir: PathBuf::new(),
            frames,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Camera and extractor replaying this recording in lockstep.
    pub fn open_devices(self: &Arc<Self>) -> (ReplayCamera, ReplayExtractor) {
        (
            ReplayCamera {
                recording: Arc::clone(self),
                cursor: 0,
                released: false,
            },
            ReplayExtractor {
                recording: Arc::clone(self),
                closed: false,
            },
        )
    }
}

/// Replays recorded frames in order, then reports [`CameraError::Exhausted`].
pub struct ReplayCamera {
    recording: Arc<Recording>,
    cursor: usize,
    released: bool,
}

impl FrameSource for ReplayCamera {
    fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.released {
            return Err(CameraError::Released);
        }
        let Some(recorded) = self.recording.frames.get(self.cursor) else {
            return Err(CameraError::Exhausted(self.cursor as u64));
        };
        let sequence = self.cursor as u64;
        self.cursor += 1;

        let Some(image_path) = &recorded.image else {
            return Ok(Frame::blank(sequence, BLANK_WIDTH, BLANK_HEIGHT));
        };
        let path = self.recording.base_dir.join(image_path);
        let rgb = image::open(&path)
            .map_err(|source| CameraError::Decode { path, source })?
            .to_rgb8();
        let (width, height) = rgb.dimensions();

        Ok(Frame {
            sequence,
            width,
            height,
            data: rgb.into_raw(),
        })
    }

    fn release(&mut self) {
        if !self.released {
            tracing::debug!(frames = self.cursor, "replay camera released");
        }
        self.released = true;
    }
}

/// Returns the faces recorded for the frame with the same sequence number.
pub struct ReplayExtractor {
    recording: Arc<Recording>,
    closed: bool,
}

impl LandmarkExtractor for ReplayExtractor {
    fn extract(&mut self, frame: &Frame) -> Result<Vec<Vec<Landmark>>, ExtractorError> {
        if self.closed {
            return Err(ExtractorError::Closed);
        }
        self.recording
            .frames
            .get(frame.sequence as usize)
            .map(|f| f.faces.clone())
            .ok_or_else(|| ExtractorError::Frame {
                sequence: frame.sequence,
                reason: "frame not in recording".to_string(),
            })
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

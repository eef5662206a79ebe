//! Typed face-mesh landmarks.
//!
//! The landmark extractor is an external, untrusted component: it hands back a
//! positional list of normalized 3D points where the index carries the meaning
//! (eye lids, nose tip, forehead). [`LandmarkFrame::from_points`] is the single
//! place where that list is validated and turned into a fixed-size mesh with
//! named accessors, so the detectors never index raw slices.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in a face mesh. Extractors running with iris refinement
/// append 10 extra points after these; they are accepted and dropped.
pub const MESH_LEN: usize = 468;

/// Mesh length produced with iris refinement enabled.
pub const REFINED_MESH_LEN: usize = 478;

/// Left eye contour: outer corner, upper lid ×2, inner corner, lower lid ×2.
const LEFT_EYE: [usize; 6] = [362, 385, 387, 263, 373, 380];
/// Right eye contour, same ordering as [`LEFT_EYE`].
const RIGHT_EYE: [usize; 6] = [33, 160, 158, 133, 153, 144];
const NOSE_TIP: usize = 1;
const FOREHEAD: usize = 10;

/// A single normalized landmark. `x` and `y` are in `[0, 1]` frame
/// coordinates (origin top-left), `z` is relative depth.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("face mesh too short: {0} points (expected at least {MESH_LEN})")]
    TooFewPoints(usize),
    #[error("non-finite coordinate at landmark {0}")]
    NonFinite(usize),
}

/// The six lid points of one eye.
#[derive(Debug, Clone, Copy)]
pub struct EyeContour {
    pub outer_corner: Landmark,
    pub upper: [Landmark; 2],
    pub inner_corner: Landmark,
    pub lower: [Landmark; 2],
}

/// One validated face mesh, produced per processed video frame.
#[derive(Debug, Clone)]
pub struct LandmarkFrame {
    mesh: Box<[Landmark; MESH_LEN]>,
}

impl LandmarkFrame {
    /// Validate an extractor result and take ownership of the first
    /// [`MESH_LEN`] points.
    pub fn from_points(points: &[Landmark]) -> Result<Self, LandmarkError> {
        if points.len() < MESH_LEN {
            return Err(LandmarkError::TooFewPoints(points.len()));
        }
        if let Some(idx) = points[..MESH_LEN].iter().position(|p| !p.is_finite()) {
            return Err(LandmarkError::NonFinite(idx));
        }

        let mut mesh = Box::new([Landmark::default(); MESH_LEN]);
        mesh.copy_from_slice(&points[..MESH_LEN]);
        Ok(Self { mesh })
    }

    pub fn points(&self) -> &[Landmark; MESH_LEN] {
        &self.mesh
    }

    pub fn left_eye(&self) -> EyeContour {
        self.eye(&LEFT_EYE)
    }

    pub fn right_eye(&self) -> EyeContour {
        self.eye(&RIGHT_EYE)
    }

    pub fn nose_tip(&self) -> Landmark {
        self.mesh[NOSE_TIP]
    }

    /// Top-of-head reference point used as the origin for head pose offsets.
    pub fn forehead(&self) -> Landmark {
        self.mesh[FOREHEAD]
    }

    fn eye(&self, idx: &[usize; 6]) -> EyeContour {
        EyeContour {
            outer_corner: self.mesh[idx[0]],
            upper: [self.mesh[idx[1]], self.mesh[idx[2]]],
            inner_corner: self.mesh[idx[3]],
            lower: [self.mesh[idx[4]], self.mesh[idx[5]]],
        }
    }
}

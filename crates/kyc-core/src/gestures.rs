//! Stateless gesture detectors over a single [`LandmarkFrame`].
//!
//! Both detectors are single-frame threshold checks: there is no smoothing,
//! debouncing or hysteresis, so one below-threshold frame counts as a blink
//! and one off-centre frame counts as a head turn.

use serde::{Deserialize, Serialize};

use crate::landmarks::{EyeContour, LandmarkFrame};

/// Eye openness (normalized frame height) below which an eye counts as closed.
pub const BLINK_THRESHOLD: f32 = 0.025;

/// Nose-to-forehead offset (normalized) beyond which the head counts as turned.
pub const HEAD_MOVEMENT_THRESHOLD: f32 = 0.1;

/// Head direction reported by [`detect_head_movement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadMovement {
    pub direction: Direction,
    pub moved: bool,
}

/// Vertical lid gap of one eye: highest upper-lid y against lowest lower-lid y.
pub fn eye_openness(eye: &EyeContour) -> f32 {
    let upper_y = eye.upper[0].y.max(eye.upper[1].y);
    let lower_y = eye.lower[0].y.min(eye.lower[1].y);
    (upper_y - lower_y).abs()
}

/// Return true if either eye is closed in this frame.
///
/// `threshold` defaults to [`BLINK_THRESHOLD`].
pub fn detect_blink(frame: &LandmarkFrame, threshold: Option<f32>) -> bool {
    let threshold = threshold.unwrap_or(BLINK_THRESHOLD);
    let left = eye_openness(&frame.left_eye());
    let right = eye_openness(&frame.right_eye());
    left < threshold || right < threshold
}

/// Classify head pose from the nose tip's offset relative to the forehead.
///
/// The horizontal axis is checked first: a frame turned both sideways and
/// vertically past the threshold reports left/right only. `threshold`
/// defaults to [`HEAD_MOVEMENT_THRESHOLD`].
pub fn detect_head_movement(frame: &LandmarkFrame, threshold: Option<f32>) -> HeadMovement {
    let threshold = threshold.unwrap_or(HEAD_MOVEMENT_THRESHOLD);
    let nose = frame.nose_tip();
    let forehead = frame.forehead();

    let x_diff = nose.x - forehead.x;
    let y_diff = nose.y - forehead.y;

    if x_diff.abs() > threshold {
        let direction = if x_diff > 0.0 {
            Direction::Right
        } else {
            Direction::Left
        };
        return HeadMovement {
            direction,
            moved: true,
        };
    }

    if y_diff.abs() > threshold {
        let direction = if y_diff > 0.0 {
            Direction::Down
        } else {
            Direction::Up
        };
        return HeadMovement {
            direction,
            moved: true,
        };
    }

    HeadMovement {
        direction: Direction::Center,
        moved: false,
    }
}

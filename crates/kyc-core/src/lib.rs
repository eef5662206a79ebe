//! Core of the KYC liveness flow: typed landmarks, stateless gesture
//! detectors, and the checklist state machine that sequences them.

pub mod gestures;
pub mod landmarks;
pub mod liveness;
pub mod prompt;

pub use gestures::{detect_blink, detect_head_movement, Direction, HeadMovement};
pub use landmarks::{EyeContour, Landmark, LandmarkError, LandmarkFrame, MESH_LEN};
pub use liveness::{
    Checklist, CompletionPolicy, DetectionStep, Gesture, LivenessTracker, Thresholds, Transition,
};

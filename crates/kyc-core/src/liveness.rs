//! Active liveness detection via a prompted gesture checklist.
//!
//! A live subject is asked to perform a fixed script of gestures — blink, turn
//! left, turn right, look up — each verified from a single landmark frame.
//! [`LivenessTracker`] consumes one [`LandmarkFrame`] per processed video frame
//! and advances strictly forward through the script. Each gesture is accepted
//! exactly once; wrong-direction or repeated movements are ignored.
//!
//! Passing the final gesture asks the caller to capture and submit a selfie
//! ([`Transition::SubmitSelfie`]). Whether the tracker then reports
//! [`DetectionStep::Complete`] immediately or only after the upload is
//! acknowledged is governed by [`CompletionPolicy`].
//!
//! # Threat Coverage
//!
//! - **Blocks:** Static photographs (cannot blink or turn on cue).
//! - **Does not block:** Video replay of a recorded gesture sequence, masks,
//!   or adversarial displays. There is no timing or randomisation.

use serde::{Deserialize, Serialize};

use crate::gestures::{self, Direction, BLINK_THRESHOLD, HEAD_MOVEMENT_THRESHOLD};
use crate::landmarks::LandmarkFrame;

/// One-way flags recording which gestures have been seen.
///
/// Every flag starts false and can only be set, never cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checklist {
    pub blink_detected: bool,
    pub head_left: bool,
    pub head_right: bool,
    pub head_up: bool,
    pub head_down: bool,
}

impl Checklist {
    /// True once every gesture of the shipped script has been seen.
    /// `head_down` is not part of the script and is not required.
    pub fn all_gestures_passed(&self) -> bool {
        self.blink_detected && self.head_left && self.head_right && self.head_up
    }

    /// Number of flags set.
    pub fn count(&self) -> usize {
        [
            self.blink_detected,
            self.head_left,
            self.head_right,
            self.head_up,
            self.head_down,
        ]
        .iter()
        .filter(|f| **f)
        .count()
    }

    fn flag(&self, gesture: Gesture) -> bool {
        match gesture {
            Gesture::Blink => self.blink_detected,
            Gesture::HeadLeft => self.head_left,
            Gesture::HeadRight => self.head_right,
            Gesture::HeadUp => self.head_up,
            Gesture::HeadDown => self.head_down,
        }
    }

    fn set(&mut self, gesture: Gesture) {
        match gesture {
            Gesture::Blink => self.blink_detected = true,
            Gesture::HeadLeft => self.head_left = true,
            Gesture::HeadRight => self.head_right = true,
            Gesture::HeadUp => self.head_up = true,
            Gesture::HeadDown => self.head_down = true,
        }
    }
}

/// A gesture that sets one checklist flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Blink,
    HeadLeft,
    HeadRight,
    HeadUp,
    HeadDown,
}

/// Current stage of the liveness script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectionStep {
    Initial,
    Blink,
    LookLeft,
    LookRight,
    LookUp,
    /// Defined with a prompt and a gesture but no step advances into it:
    /// the shipped script ends after `LookUp`.
    LookDown,
    Complete,
}

impl DetectionStep {
    /// The step that follows this one in the script.
    pub fn next(self) -> DetectionStep {
        match self {
            DetectionStep::Initial => DetectionStep::Blink,
            DetectionStep::Blink => DetectionStep::LookLeft,
            DetectionStep::LookLeft => DetectionStep::LookRight,
            DetectionStep::LookRight => DetectionStep::LookUp,
            DetectionStep::LookUp => DetectionStep::Complete,
            DetectionStep::LookDown => DetectionStep::Complete,
            DetectionStep::Complete => DetectionStep::Complete,
        }
    }

    /// Gesture this step waits for, if any.
    pub fn gesture(self) -> Option<Gesture> {
        match self {
            DetectionStep::Blink => Some(Gesture::Blink),
            DetectionStep::LookLeft => Some(Gesture::HeadLeft),
            DetectionStep::LookRight => Some(Gesture::HeadRight),
            DetectionStep::LookUp => Some(Gesture::HeadUp),
            DetectionStep::LookDown => Some(Gesture::HeadDown),
            DetectionStep::Initial | DetectionStep::Complete => None,
        }
    }

    fn required_direction(self) -> Option<Direction> {
        match self {
            DetectionStep::LookLeft => Some(Direction::Left),
            DetectionStep::LookRight => Some(Direction::Right),
            DetectionStep::LookUp => Some(Direction::Up),
            DetectionStep::LookDown => Some(Direction::Down),
            _ => None,
        }
    }

    /// True when passing this step's gesture finishes the script.
    fn is_final(self) -> bool {
        self.gesture().is_some() && self.next() == DetectionStep::Complete
    }
}

/// When the tracker is allowed to report [`DetectionStep::Complete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionPolicy {
    /// Complete only after the selfie upload is acknowledged.
    #[default]
    Confirmed,
    /// Complete as soon as the last gesture passes; the upload outcome does
    /// not affect the step.
    Local,
}

/// Detector thresholds, in normalized frame units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub blink: f32,
    pub head_movement: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            blink: BLINK_THRESHOLD,
            head_movement: HEAD_MOVEMENT_THRESHOLD,
        }
    }
}

/// Effect of observing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed.
    None,
    /// First face seen; the script has started.
    FaceFound,
    /// A gesture passed and the script advanced.
    Passed(Gesture),
    /// The final gesture passed; the caller must capture and submit a selfie.
    SubmitSelfie(Gesture),
}

/// Checklist state machine for one liveness session.
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    step: DetectionStep,
    checklist: Checklist,
    policy: CompletionPolicy,
    thresholds: Thresholds,
    upload_pending: bool,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new(CompletionPolicy::default(), Thresholds::default())
    }
}

impl LivenessTracker {
    pub fn new(policy: CompletionPolicy, thresholds: Thresholds) -> Self {
        Self {
            step: DetectionStep::Initial,
            checklist: Checklist::default(),
            policy,
            thresholds,
            upload_pending: false,
        }
    }

    pub fn step(&self) -> DetectionStep {
        self.step
    }

    pub fn checklist(&self) -> Checklist {
        self.checklist
    }

    pub fn is_complete(&self) -> bool {
        self.step == DetectionStep::Complete
    }

    /// True while a selfie upload is in flight under [`CompletionPolicy::Confirmed`].
    pub fn upload_pending(&self) -> bool {
        self.upload_pending
    }

    /// True when the script is done but the upload failed and has not been re-armed.
    pub fn awaiting_retry(&self) -> bool {
        self.policy == CompletionPolicy::Confirmed
            && !self.upload_pending
            && !self.is_complete()
            && self.checklist.all_gestures_passed()
    }

    /// Apply one landmark frame. At most one checklist flag changes per call.
    pub fn observe(&mut self, frame: &LandmarkFrame) -> Transition {
        if self.is_complete() || self.upload_pending {
            return Transition::None;
        }

        if self.step == DetectionStep::Initial {
            self.step = self.step.next();
            tracing::debug!(step = ?self.step, "face detected, liveness script started");
            return Transition::FaceFound;
        }

        let Some(gesture) = self.step.gesture() else {
            return Transition::None;
        };
        if self.checklist.flag(gesture) || !self.gesture_seen(frame) {
            return Transition::None;
        }

        self.checklist.set(gesture);
        tracing::info!(gesture = ?gesture, step = ?self.step, "gesture passed");

        if !self.step.is_final() {
            self.step = self.step.next();
            return Transition::Passed(gesture);
        }

        match self.policy {
            CompletionPolicy::Local => self.step = DetectionStep::Complete,
            CompletionPolicy::Confirmed => self.upload_pending = true,
        }
        Transition::SubmitSelfie(gesture)
    }

    /// Report the outcome of the selfie upload requested by
    /// [`Transition::SubmitSelfie`]. Returns the step afterwards.
    pub fn submission_finished(&mut self, ok: bool) -> DetectionStep {
        if !self.upload_pending {
            return self.step;
        }
        self.upload_pending = false;
        if ok {
            debug_assert!(self.checklist.all_gestures_passed());
            self.step = DetectionStep::Complete;
        } else {
            tracing::warn!(step = ?self.step, "selfie upload failed, awaiting retry");
        }
        self.step
    }

    /// Re-arm a failed upload. Returns true if the caller should capture and
    /// submit again.
    pub fn retry_submission(&mut self) -> bool {
        if !self.awaiting_retry() {
            return false;
        }
        self.upload_pending = true;
        true
    }

    fn gesture_seen(&self, frame: &LandmarkFrame) -> bool {
        if self.step == DetectionStep::Blink {
            return gestures::detect_blink(frame, Some(self.thresholds.blink));
        }

        let movement = gestures::detect_head_movement(frame, Some(self.thresholds.head_movement));
        movement.moved && Some(movement.direction) == self.step.required_direction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::fixtures::*;
    use crate::landmarks::Landmark;
    use proptest::prelude::*;

    fn neutral() -> LandmarkFrame {
        frame(&neutral_points())
    }

    fn blink() -> LandmarkFrame {
        frame(&with_left_eye_openness(neutral_points(), 0.01))
    }

    fn turned(dx: f32, dy: f32) -> LandmarkFrame {
        frame(&with_nose_offset(neutral_points(), dx, dy))
    }

    fn tracker(policy: CompletionPolicy) -> LivenessTracker {
        LivenessTracker::new(policy, Thresholds::default())
    }

    #[test]
    fn test_first_face_starts_script() {
        let mut t = LivenessTracker::default();
        assert_eq!(t.step(), DetectionStep::Initial);
        // Even a blinking first frame only starts the script
        assert_eq!(t.observe(&blink()), Transition::FaceFound);
        assert_eq!(t.step(), DetectionStep::Blink);
        assert_eq!(t.checklist(), Checklist::default());
    }

    #[test]
    fn test_full_scripted_sequence_local() {
        let mut t = tracker(CompletionPolicy::Local);
        assert_eq!(t.observe(&neutral()), Transition::FaceFound);

        assert_eq!(t.observe(&blink()), Transition::Passed(Gesture::Blink));
        assert!(t.checklist().blink_detected);
        assert_eq!(t.step(), DetectionStep::LookLeft);

        assert_eq!(t.observe(&turned(-0.15, 0.05)), Transition::Passed(Gesture::HeadLeft));
        assert!(t.checklist().head_left);
        assert_eq!(t.step(), DetectionStep::LookRight);

        assert_eq!(t.observe(&turned(0.15, 0.05)), Transition::Passed(Gesture::HeadRight));
        assert!(t.checklist().head_right);
        assert_eq!(t.step(), DetectionStep::LookUp);

        assert_eq!(t.observe(&turned(0.0, -0.12)), Transition::SubmitSelfie(Gesture::HeadUp));
        assert!(t.checklist().head_up);
        assert!(!t.checklist().head_down);
        assert_eq!(t.step(), DetectionStep::Complete);

        // Local completion is not undone by a failed upload
        assert_eq!(t.submission_finished(false), DetectionStep::Complete);
    }

    #[test]
    fn test_confirmed_completes_after_upload() {
        let mut t = tracker(CompletionPolicy::Confirmed);
        for f in [neutral(), blink(), turned(-0.15, 0.05), turned(0.15, 0.05)] {
            t.observe(&f);
        }
        assert_eq!(t.observe(&turned(0.0, -0.12)), Transition::SubmitSelfie(Gesture::HeadUp));
        assert_eq!(t.step(), DetectionStep::LookUp);
        assert!(t.upload_pending());

        // Frames are ignored while the upload is in flight
        assert_eq!(t.observe(&turned(0.0, -0.12)), Transition::None);

        assert_eq!(t.submission_finished(true), DetectionStep::Complete);
        assert!(t.is_complete());
    }

    #[test]
    fn test_confirmed_failed_upload_can_retry() {
        let mut t = tracker(CompletionPolicy::Confirmed);
        for f in [neutral(), blink(), turned(-0.15, 0.05), turned(0.15, 0.05), turned(0.0, -0.12)] {
            t.observe(&f);
        }
        assert_eq!(t.submission_finished(false), DetectionStep::LookUp);
        assert!(t.awaiting_retry());
        assert!(t.checklist().head_up);

        // Repeating the gesture does not trigger another upload
        assert_eq!(t.observe(&turned(0.0, -0.12)), Transition::None);

        assert!(t.retry_submission());
        assert!(t.upload_pending());
        assert!(!t.retry_submission());
        assert_eq!(t.submission_finished(true), DetectionStep::Complete);
    }

    #[test]
    fn test_retry_rejected_before_script_done() {
        let mut t = tracker(CompletionPolicy::Confirmed);
        t.observe(&neutral());
        assert!(!t.retry_submission());
        assert!(!t.upload_pending());
    }

    #[test]
    fn test_wrong_direction_ignored() {
        let mut t = LivenessTracker::default();
        t.observe(&neutral());
        t.observe(&blink());
        assert_eq!(t.step(), DetectionStep::LookLeft);

        assert_eq!(t.observe(&turned(0.15, 0.0)), Transition::None);
        assert!(!t.checklist().head_left);
        assert!(!t.checklist().head_right);
        assert_eq!(t.step(), DetectionStep::LookLeft);

        assert_eq!(t.observe(&turned(0.0, -0.2)), Transition::None);
        assert_eq!(t.step(), DetectionStep::LookLeft);
    }

    #[test]
    fn test_open_eyes_do_not_pass_blink() {
        let mut t = LivenessTracker::default();
        t.observe(&neutral());
        for _ in 0..10 {
            assert_eq!(t.observe(&turned(-0.2, 0.0)), Transition::None);
        }
        assert_eq!(t.step(), DetectionStep::Blink);
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut t = tracker(CompletionPolicy::Local);
        for f in [neutral(), blink(), turned(-0.15, 0.05), turned(0.15, 0.05), turned(0.0, -0.12)] {
            t.observe(&f);
        }
        let before = t.checklist();
        for f in [blink(), turned(0.0, 0.2), neutral()] {
            assert_eq!(t.observe(&f), Transition::None);
        }
        assert_eq!(t.checklist(), before);
        assert_eq!(t.step(), DetectionStep::Complete);
    }

    #[test]
    fn test_step_script_order() {
        let mut step = DetectionStep::Initial;
        let mut seen = vec![step];
        while step != DetectionStep::Complete {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(
            seen,
            vec![
                DetectionStep::Initial,
                DetectionStep::Blink,
                DetectionStep::LookLeft,
                DetectionStep::LookRight,
                DetectionStep::LookUp,
                DetectionStep::Complete,
            ]
        );
        assert!(!seen.contains(&DetectionStep::LookDown));
        assert_eq!(DetectionStep::LookDown.gesture(), Some(Gesture::HeadDown));
    }

    #[test]
    fn test_step_serializes_camel_case() {
        let json = serde_json::to_string(&DetectionStep::LookLeft).unwrap();
        assert_eq!(json, "\"lookLeft\"");
    }

    fn arb_frame() -> impl Strategy<Value = LandmarkFrame> {
        (0.0f32..0.06, 0.0f32..0.06, -0.3f32..0.3, -0.25f32..0.3).prop_map(
            |(left, right, dx, dy)| {
                let points: Vec<Landmark> = with_nose_offset(
                    with_right_eye_openness(with_left_eye_openness(neutral_points(), left), right),
                    dx,
                    dy,
                );
                frame(&points)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_checklist_invariants(
            frames in prop::collection::vec(arb_frame(), 0..60),
            policy in prop_oneof![Just(CompletionPolicy::Local), Just(CompletionPolicy::Confirmed)],
            upload_ok in any::<bool>(),
        ) {
            let mut t = tracker(policy);
            let mut prev = t.checklist();
            for f in &frames {
                let transition = t.observe(f);
                let now = t.checklist();

                // At most one flag per frame
                prop_assert!(now.count() <= prev.count() + 1);
                // Flags are one-way
                prop_assert!(!prev.blink_detected || now.blink_detected);
                prop_assert!(!prev.head_left || now.head_left);
                prop_assert!(!prev.head_right || now.head_right);
                prop_assert!(!prev.head_up || now.head_up);
                prop_assert!(!now.head_down);

                if matches!(transition, Transition::SubmitSelfie(_)) {
                    t.submission_finished(upload_ok);
                }
                if t.is_complete() {
                    prop_assert!(t.checklist().all_gestures_passed());
                }
                prev = t.checklist();
            }
        }
    }
}

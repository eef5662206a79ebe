//! User-facing prompt text for each liveness step.

use crate::liveness::{Checklist, DetectionStep, Gesture};

/// Instruction shown to the user for the current step.
pub fn prompt_message(step: DetectionStep, submitting: bool) -> &'static str {
    if submitting {
        return "Submitting KYC verification...";
    }
    match step {
        DetectionStep::Initial => "Position your face in the frame",
        DetectionStep::Blink => "Please blink naturally",
        DetectionStep::LookLeft => "Turn your head to the left",
        DetectionStep::LookRight => "Turn your head to the right",
        DetectionStep::LookUp => "Look up slightly",
        DetectionStep::LookDown => "Look down slightly",
        DetectionStep::Complete => "Liveness check complete!",
    }
}

/// Confirmation shown when a gesture passes.
pub fn gesture_message(gesture: Gesture) -> &'static str {
    match gesture {
        Gesture::Blink => "Blink detected!",
        Gesture::HeadLeft => "Left turn detected!",
        Gesture::HeadRight => "Right turn detected!",
        Gesture::HeadUp => "Up movement detected!",
        Gesture::HeadDown => "Down movement detected!",
    }
}

/// One row of the displayed checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecklistItem {
    pub label: &'static str,
    pub done: bool,
}

/// Rows for the scripted gestures, in prompt order.
pub fn checklist_items(checklist: &Checklist) -> [ChecklistItem; 4] {
    [
        ChecklistItem {
            label: "Blink Detection",
            done: checklist.blink_detected,
        },
        ChecklistItem {
            label: "Head Turn Left",
            done: checklist.head_left,
        },
        ChecklistItem {
            label: "Head Turn Right",
            done: checklist.head_right,
        },
        ChecklistItem {
            label: "Look Up",
            done: checklist.head_up,
        },
    ]
}

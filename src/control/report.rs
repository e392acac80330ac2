use std::fmt;

use crate::detect::RawDetection;
use crate::error::SentryError;

/// Exit code for a run stopped by the cancel token.
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Terminated,
    Failed(String),
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => f.write_str("idle"),
            LoopState::Running => f.write_str("running"),
            LoopState::Stopping => f.write_str("stopping"),
            LoopState::Terminated => f.write_str("terminated"),
            LoopState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

#[derive(Debug)]
pub enum LoopOutcome {
    TargetDetected(RawDetection),
    Cancelled,
    Failed(SentryError),
}

/// Camera the loop ended up using.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraSelection {
    pub index: u32,
    pub width: u32,
    pub height: u32,
}

/// Summary of one `ControlLoop::run`.
#[derive(Debug)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    /// Every state the loop passed through, starting at `Idle`.
    pub history: Vec<LoopState>,
    /// Ticks started while `Running`.
    pub ticks: u64,
    pub camera: Option<CameraSelection>,
}

impl LoopReport {
    pub fn final_state(&self) -> Option<&LoopState> {
        self.history.last()
    }

    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            LoopOutcome::TargetDetected(_) => 0,
            LoopOutcome::Cancelled => EXIT_CANCELLED,
            LoopOutcome::Failed(err) => err.exit_code(),
        }
    }

    pub fn error(&self) -> Option<&SentryError> {
        match &self.outcome {
            LoopOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn report(outcome: LoopOutcome) -> LoopReport {
        LoopReport {
            outcome,
            history: vec![LoopState::Idle, LoopState::Terminated],
            ticks: 0,
            camera: None,
        }
    }

    #[test]
    fn exit_codes_follow_outcome() {
        let hit = RawDetection::new("bottle", 0.8, BoundingBox::default());
        assert_eq!(report(LoopOutcome::TargetDetected(hit)).exit_code(), 0);
        assert_eq!(report(LoopOutcome::Cancelled).exit_code(), 130);
        assert_eq!(
            report(LoopOutcome::Failed(SentryError::FrameRead("eof".into()))).exit_code(),
            2
        );
        assert_eq!(
            report(LoopOutcome::Failed(SentryError::CameraUnavailable("none".into()))).exit_code(),
            1
        );
    }

    #[test]
    fn failed_state_displays_reason() {
        assert_eq!(
            LoopState::Failed("frame read failed: eof".into()).to_string(),
            "failed (frame read failed: eof)"
        );
    }
}

use anyhow::{anyhow, Result};
use std::collections::VecDeque;

use crate::detect::backend::ObjectDetector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// One scripted reply from `StubDetector`.
#[derive(Clone, Debug)]
pub enum StubResponse {
    Detections(Vec<RawDetection>),
    Fail(String),
}

/// Stub backend for dry runs and tests.
///
/// Replays scripted responses in order, one per `detect` call, and reports
/// nothing once the script is exhausted.
#[derive(Default)]
pub struct StubDetector {
    script: VecDeque<StubResponse>,
    warm_up_error: Option<String>,
    calls: u64,
}

impl StubDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(script: Vec<StubResponse>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Make `warm_up` fail with `message`.
    pub fn failing_warm_up(mut self, message: impl Into<String>) -> Self {
        self.warm_up_error = Some(message.into());
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl ObjectDetector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(StubResponse::Detections(detections)) => Ok(detections),
            Some(StubResponse::Fail(message)) => Err(anyhow!(message)),
            None => Ok(Vec::new()),
        }
    }

    fn warm_up(&mut self) -> Result<()> {
        match &self.warm_up_error {
            Some(message) => Err(anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn replays_script_then_reports_nothing() -> Result<()> {
        let frame = Frame::filled(2, 2, 0, 1)?;
        let bottle = RawDetection::new("bottle", 0.7, BoundingBox::default());
        let mut detector = StubDetector::scripted(vec![
            StubResponse::Detections(vec![bottle.clone()]),
            StubResponse::Fail("boom".into()),
        ]);

        assert_eq!(detector.detect(&frame)?, vec![bottle]);
        assert!(detector.detect(&frame).is_err());
        assert!(detector.detect(&frame)?.is_empty());
        assert_eq!(detector.calls(), 3);
        Ok(())
    }
}

//! Confidence and class filtering on top of a detector.

use std::collections::BTreeSet;

use crate::error::{SentryError, SentryResult};
use crate::frame::Frame;

use super::backend::ObjectDetector;
use super::result::{DetectionOutcome, RawDetection};

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionConfig {
    /// Minimum confidence, inclusive, in `0.0..=1.0`.
    pub confidence_threshold: f32,
    /// Allowed class names. Empty matches any class.
    pub target_classes: BTreeSet<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            target_classes: BTreeSet::from(["bottle".to_string()]),
        }
    }
}

impl DetectionConfig {
    pub fn new<I, S>(confidence_threshold: f32, target_classes: I) -> SentryResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = Self {
            confidence_threshold,
            target_classes: target_classes.into_iter().map(Into::into).collect(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SentryResult<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(SentryError::Config(format!(
                "confidence_threshold must be within 0.0..=1.0, got {}",
                self.confidence_threshold
            )));
        }
        Ok(())
    }

    /// True if `detection` passes both the threshold and the class allow-list.
    pub fn qualifies(&self, detection: &RawDetection) -> bool {
        detection.confidence >= self.confidence_threshold
            && (self.target_classes.is_empty()
                || self.target_classes.contains(&detection.class_name))
    }
}

/// Applies a `DetectionConfig` to raw detector output.
///
/// The filter holds no detector and caches nothing; every `evaluate` runs
/// inference exactly once.
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    config: DetectionConfig,
}

impl DetectionFilter {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn evaluate(
        &self,
        frame: &Frame,
        detector: &mut dyn ObjectDetector,
    ) -> SentryResult<DetectionOutcome> {
        let detections = detector.detect(frame).map_err(|err| {
            SentryError::Detection(format!("{}: {}", detector.name(), SentryError::chain(&err)))
        })?;
        Ok(self.select(detections))
    }

    /// Pick the highest-confidence qualifying detection. Ties keep the earliest.
    pub fn select(&self, detections: Vec<RawDetection>) -> DetectionOutcome {
        let mut best: Option<RawDetection> = None;
        for detection in detections {
            if !self.config.qualifies(&detection) {
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |current| detection.confidence > current.confidence);
            if better {
                best = Some(detection);
            }
        }
        match best {
            Some(detection) => DetectionOutcome::matched(detection),
            None => DetectionOutcome::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, StubDetector, StubResponse};

    fn det(class: &str, confidence: f32) -> RawDetection {
        RawDetection::new(class, confidence, BoundingBox::new(1.0, 2.0, 3.0, 4.0))
    }

    fn bottle_filter() -> DetectionFilter {
        DetectionFilter::new(DetectionConfig::new(0.5, ["bottle"]).unwrap())
    }

    fn frame() -> Frame {
        Frame::filled(2, 2, 0, 1).unwrap()
    }

    fn evaluate_one(filter: &DetectionFilter, detection: RawDetection) -> DetectionOutcome {
        let mut detector =
            StubDetector::scripted(vec![StubResponse::Detections(vec![detection])]);
        filter.evaluate(&frame(), &mut detector).unwrap()
    }

    #[test]
    fn threshold_is_inclusive() {
        let filter = bottle_filter();
        assert!(!evaluate_one(&filter, det("bottle", 0.49)).matched);
        assert!(evaluate_one(&filter, det("bottle", 0.5)).matched);
    }

    #[test]
    fn other_classes_do_not_match() {
        let filter = bottle_filter();
        let outcome = evaluate_one(&filter, det("cup", 0.9));
        assert!(!outcome.matched);
        assert!(outcome.best_match.is_none());
    }

    #[test]
    fn empty_allow_list_matches_any_class() {
        let filter = DetectionFilter::new(DetectionConfig::new(0.3, Vec::<String>::new()).unwrap());
        let outcome = evaluate_one(&filter, det("cup", 0.4));
        assert!(outcome.matched);
        assert_eq!(outcome.best_match.unwrap().class_name, "cup");
    }

    #[test]
    fn best_match_is_highest_confidence_with_first_wins_ties() {
        let filter = DetectionFilter::new(DetectionConfig::new(0.5, ["bottle", "cup"]).unwrap());
        let mut first_cup = det("cup", 0.8);
        first_cup.bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let outcome = filter.select(vec![
            det("bottle", 0.6),
            first_cup.clone(),
            det("bottle", 0.8),
            det("person", 0.99),
        ]);
        assert_eq!(outcome.best_match, Some(first_cup));
    }

    #[test]
    fn detector_failure_is_a_detection_error() {
        let filter = bottle_filter();
        let mut detector = StubDetector::scripted(vec![StubResponse::Fail("tensor shape".into())]);
        let err = filter.evaluate(&frame(), &mut detector).unwrap_err();
        assert!(matches!(err, SentryError::Detection(_)));
    }

    #[test]
    fn detector_is_called_once_per_evaluate() {
        let filter = bottle_filter();
        let mut detector = StubDetector::new();
        filter.evaluate(&frame(), &mut detector).unwrap();
        filter.evaluate(&frame(), &mut detector).unwrap();
        assert_eq!(detector.calls(), 2);
    }

    #[test]
    fn threshold_outside_unit_range_is_rejected() {
        assert!(DetectionConfig::new(1.5, ["bottle"]).is_err());
        assert!(DetectionConfig::new(-0.1, ["bottle"]).is_err());
    }
}

use std::time::{Duration, Instant};

use super::clock::CancelToken;
use crate::camera::CameraSource;
use crate::detect::{DetectionFilter, ObjectDetector};
use crate::error::{SentryError, SentryResult};

/// Frames between inferences when nothing else is configured.
pub const DEFAULT_INFERENCE_STRIDE: u64 = 5;
/// Frames between throughput reports.
pub const DEFAULT_REPORT_EVERY: u64 = 30;

/// Detection-only watch: the camera and detector run, the motor never does.
#[derive(Clone, Debug)]
pub struct WatchPlan {
    /// Run inference on every Nth frame.
    pub every: u64,
    pub report_every: u64,
    /// Stop after this many frames. `None` runs until cancelled.
    pub max_frames: Option<u64>,
}

impl Default for WatchPlan {
    fn default() -> Self {
        Self {
            every: DEFAULT_INFERENCE_STRIDE,
            report_every: DEFAULT_REPORT_EVERY,
            max_frames: None,
        }
    }
}

impl WatchPlan {
    pub fn validate(&self) -> SentryResult<()> {
        if self.every == 0 || self.report_every == 0 {
            return Err(SentryError::Config(
                "watch stride and report interval must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub frames: u64,
    pub inferences: u64,
    pub matches: u64,
    pub detection_errors: u64,
}

impl WatchStats {
    /// Count one frame; returns whether it is due for inference.
    pub fn record_frame(&mut self, plan: &WatchPlan) -> bool {
        self.frames += 1;
        let due = self.frames % plan.every.max(1) == 0;
        if due {
            self.inferences += 1;
        }
        due
    }

    pub fn report_due(&self, plan: &WatchPlan) -> bool {
        self.frames > 0 && self.frames % plan.report_every.max(1) == 0
    }

    pub fn fps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Read frames from `camera` and log every qualifying detection.
///
/// Runs until `plan.max_frames` is reached or `cancel` fires. A frame read
/// failure ends the watch with an error; detector errors are logged and the
/// frame is skipped. The camera stays open for the caller to close.
pub fn run_watch(
    camera: &mut CameraSource,
    detector: &mut dyn ObjectDetector,
    filter: &DetectionFilter,
    plan: &WatchPlan,
    cancel: &CancelToken,
) -> SentryResult<WatchStats> {
    plan.validate()?;
    let started = Instant::now();
    let mut stats = WatchStats::default();

    while !cancel.is_cancelled() && plan.max_frames.map_or(true, |max| stats.frames < max) {
        let frame = camera.read_frame()?;
        if stats.record_frame(plan) {
            match filter.evaluate(&frame, detector) {
                Ok(outcome) => {
                    if let Some(hit) = outcome.best_match {
                        stats.matches += 1;
                        let b = hit.bbox;
                        log::info!(
                            "{} detected (confidence {:.2}, box {:.0},{:.0}-{:.0},{:.0}) on frame {}",
                            hit.class_name,
                            hit.confidence,
                            b.x1,
                            b.y1,
                            b.x2,
                            b.y2,
                            frame.sequence
                        );
                    }
                }
                Err(err) => {
                    stats.detection_errors += 1;
                    log::warn!("frame {}: {}", frame.sequence, err);
                }
            }
        }
        if stats.report_due(plan) {
            log::info!(
                "FPS: {:.1}, matches so far: {}",
                stats.fps(started.elapsed()),
                stats.matches
            );
        }
    }

    log::info!(
        "watch finished: {} frames, {} inferences, {} matches",
        stats.frames,
        stats.inferences,
        stats.matches
    );
    Ok(stats)
}

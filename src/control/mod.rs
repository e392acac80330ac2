//! The vision-gated control loop.
//!
//! `ControlLoop::run` initializes the motor driver, the camera and the
//! detector (in that order), starts the motor, then polls the detector once
//! per tick until a qualifying detection, a fatal I/O error, or cancellation.
//! The driver and camera are owned by the run and released on every exit path.

mod clock;
mod report;
mod sweep;
mod watch;

pub use clock::{CancelToken, RecordingSleeper, Sleeper, ThreadSleeper};
pub use report::{CameraSelection, LoopOutcome, LoopReport, LoopState, EXIT_CANCELLED};
pub use sweep::{run_sweep, SweepPlan, SWEEP_SPEEDS};
pub use watch::{
    run_watch, WatchPlan, WatchStats, DEFAULT_INFERENCE_STRIDE, DEFAULT_REPORT_EVERY,
};

use std::time::Duration;

use crate::camera::{CameraConfig, CameraSource, CaptureBackend};
use crate::detect::{DetectionConfig, DetectionFilter, ObjectDetector, RawDetection};
use crate::error::{SentryError, SentryResult};
use crate::events::{EventSink, InitStage, SentryEvent, StopReason};
use crate::motor::{
    Direction, GpioChip, GpioMode, HardwareMotorDriver, MotorCommand, MotorPins, Speed,
};

/// Immutable inputs to one run.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub pins: MotorPins,
    pub gpio_mode: GpioMode,
    pub direction: Direction,
    pub speed: Speed,
    pub interval: Duration,
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    /// Consecutive frame read failures tolerated before the run fails.
    pub frame_read_retries: u32,
}

impl LoopSettings {
    pub fn new(pins: MotorPins) -> Self {
        Self {
            pins,
            gpio_mode: GpioMode::Bcm,
            direction: Direction::Clockwise,
            speed: Speed::default(),
            interval: Duration::from_millis(100),
            camera: CameraConfig::default(),
            detection: DetectionConfig::default(),
            frame_read_retries: 0,
        }
    }

    pub fn validate(&self) -> SentryResult<()> {
        if self.interval.is_zero() {
            return Err(SentryError::Config(
                "detection interval must be greater than zero".into(),
            ));
        }
        self.detection.validate()
    }
}

/// Resources claimed during initialization.
#[derive(Default)]
struct Claimed {
    driver: Option<HardwareMotorDriver>,
    camera: Option<CameraSource>,
}

enum TickResult {
    Continue,
    Finished(LoopOutcome),
}

pub struct ControlLoop {
    settings: LoopSettings,
    filter: DetectionFilter,
    sink: Box<dyn EventSink>,
    sleeper: Box<dyn Sleeper>,
    cancel: CancelToken,
    history: Vec<LoopState>,
    ticks: u64,
    consecutive_read_failures: u32,
    /// Set once a start command has been issued, even if it failed partway.
    motor_engaged: bool,
    motor_stopped_emitted: bool,
}

impl ControlLoop {
    pub fn new(
        settings: LoopSettings,
        sink: Box<dyn EventSink>,
        sleeper: Box<dyn Sleeper>,
        cancel: CancelToken,
    ) -> Self {
        let filter = DetectionFilter::new(settings.detection.clone());
        Self {
            settings,
            filter,
            sink,
            sleeper,
            cancel,
            history: vec![LoopState::Idle],
            ticks: 0,
            consecutive_read_failures: 0,
            motor_engaged: false,
            motor_stopped_emitted: false,
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn state(&self) -> &LoopState {
        self.history.last().unwrap_or(&LoopState::Idle)
    }

    /// Run to completion. Consumes the loop; every path ends in `Terminated`.
    pub fn run(
        mut self,
        gpio: &mut dyn GpioChip,
        capture: &mut dyn CaptureBackend,
        detector: &mut dyn ObjectDetector,
    ) -> LoopReport {
        let mut claimed = Claimed::default();
        let outcome = match self.initialize(&mut claimed, gpio, capture, detector) {
            Ok(()) => self.drive(&mut claimed, detector),
            Err(outcome) => outcome,
        };
        self.finish(claimed, outcome)
    }

    fn initialize(
        &mut self,
        claimed: &mut Claimed,
        gpio: &mut dyn GpioChip,
        capture: &mut dyn CaptureBackend,
        detector: &mut dyn ObjectDetector,
    ) -> Result<(), LoopOutcome> {
        if let Err(err) = self.settings.validate() {
            return Err(self.init_failed(InitStage::Config, err));
        }

        match HardwareMotorDriver::initialize(gpio, self.settings.pins, self.settings.gpio_mode) {
            Ok(driver) => claimed.driver = Some(driver),
            Err(err) => return Err(self.init_failed(InitStage::Hardware, err)),
        }

        match CameraSource::open(self.settings.camera.clone(), capture) {
            Ok(camera) => claimed.camera = Some(camera),
            Err(err) => return Err(self.init_failed(InitStage::Camera, err)),
        }

        if let Err(err) = detector.warm_up() {
            let err = SentryError::ModelLoad(format!(
                "{} warm-up: {}",
                detector.name(),
                SentryError::chain(&err)
            ));
            return Err(self.init_failed(InitStage::Model, err));
        }
        Ok(())
    }

    fn drive(
        &mut self,
        claimed: &mut Claimed,
        detector: &mut dyn ObjectDetector,
    ) -> LoopOutcome {
        let (Some(driver), Some(camera)) = (claimed.driver.as_mut(), claimed.camera.as_mut())
        else {
            return self.fail(SentryError::HardwareFault(
                "control loop started without its resources".into(),
            ));
        };

        if self.cancel.is_cancelled() {
            log::info!("cancelled before the motor was started");
            self.transition(LoopState::Stopping);
            return LoopOutcome::Cancelled;
        }

        self.transition(LoopState::Running);
        let start = MotorCommand::run(self.settings.direction, self.settings.speed);
        self.motor_engaged = true;
        if let Err(err) = driver.apply(start) {
            return self.fail(err);
        }
        self.sink.emit(SentryEvent::MotorStarted {
            speed: self.settings.speed.percent(),
            direction: self.settings.direction,
        });
        log::info!(
            "motor running {:?} at {}%, watching for {:?}",
            self.settings.direction,
            self.settings.speed.percent(),
            self.settings.detection.target_classes
        );

        loop {
            if self.cancel.is_cancelled() {
                log::info!("cancel requested after {} ticks", self.ticks);
                self.transition(LoopState::Stopping);
                return LoopOutcome::Cancelled;
            }
            match self.tick(driver, camera, detector) {
                TickResult::Continue => self.sleeper.sleep(self.settings.interval),
                TickResult::Finished(outcome) => return outcome,
            }
        }
    }

    fn tick(
        &mut self,
        driver: &mut HardwareMotorDriver,
        camera: &mut CameraSource,
        detector: &mut dyn ObjectDetector,
    ) -> TickResult {
        self.ticks += 1;

        let frame = match camera.read_frame() {
            Ok(frame) => {
                self.consecutive_read_failures = 0;
                frame
            }
            Err(err) => {
                self.consecutive_read_failures += 1;
                if self.consecutive_read_failures > self.settings.frame_read_retries {
                    return TickResult::Finished(self.fail(err));
                }
                log::warn!(
                    "tick {}: {} (retry {}/{})",
                    self.ticks,
                    err,
                    self.consecutive_read_failures,
                    self.settings.frame_read_retries
                );
                return TickResult::Continue;
            }
        };

        let outcome = match self.filter.evaluate(&frame, detector) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!("tick {}: {}", self.ticks, err);
                return TickResult::Continue;
            }
        };

        match outcome.best_match {
            Some(hit) if outcome.matched => TickResult::Finished(self.stop_for(driver, hit)),
            _ => {
                log::trace!("tick {}: no target (frame {})", self.ticks, frame.sequence);
                TickResult::Continue
            }
        }
    }

    fn stop_for(&mut self, driver: &mut HardwareMotorDriver, hit: RawDetection) -> LoopOutcome {
        self.transition(LoopState::Stopping);
        if let Err(err) = driver.apply(MotorCommand::Stopped) {
            return self.fail(err);
        }
        log::info!(
            "target {} detected at {:.2} on tick {}, motor stopped",
            hit.class_name,
            hit.confidence,
            self.ticks
        );
        self.sink.emit(SentryEvent::DetectionMatch {
            class: hit.class_name.clone(),
            confidence: hit.confidence,
            bbox: hit.bbox,
        });
        self.emit_motor_stopped(StopReason::TargetDetected);
        LoopOutcome::TargetDetected(hit)
    }

    fn finish(&mut self, mut claimed: Claimed, outcome: LoopOutcome) -> LoopReport {
        let camera = claimed.camera.as_ref().map(|camera| {
            let (width, height) = camera.resolution();
            CameraSelection {
                index: camera.index(),
                width,
                height,
            }
        });

        if let Some(mut driver) = claimed.driver.take() {
            driver.release();
        }
        if let Some(mut camera) = claimed.camera.take() {
            camera.close();
        }
        if self.motor_engaged {
            let reason = match outcome {
                LoopOutcome::Cancelled => StopReason::Cancelled,
                _ => StopReason::Failure,
            };
            self.emit_motor_stopped(reason);
        }

        self.transition(LoopState::Terminated);
        LoopReport {
            outcome,
            history: std::mem::take(&mut self.history),
            ticks: self.ticks,
            camera,
        }
    }

    fn init_failed(&mut self, stage: InitStage, err: SentryError) -> LoopOutcome {
        log::error!("initialization failed at {:?} stage: {}", stage, err);
        self.sink.emit(SentryEvent::InitializationFailed {
            stage,
            detail: err.to_string(),
        });
        self.fail(err)
    }

    fn fail(&mut self, err: SentryError) -> LoopOutcome {
        if !err.is_initialization() {
            log::error!("control loop failed after {} ticks: {}", self.ticks, err);
        }
        self.transition(LoopState::Failed(err.to_string()));
        LoopOutcome::Failed(err)
    }

    fn emit_motor_stopped(&mut self, reason: StopReason) {
        if self.motor_stopped_emitted {
            return;
        }
        self.motor_stopped_emitted = true;
        self.sink.emit(SentryEvent::MotorStopped { reason });
    }

    fn transition(&mut self, next: LoopState) {
        log::debug!("loop state {} -> {}", self.state(), next);
        self.history.push(next);
    }
}

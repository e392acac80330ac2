//! motor-sentry
//!
//! Runs a DC motor until a camera-fed object detector sees a target, then
//! stops it.
//!
//! # Architecture
//!
//! One tick of the control loop reads a frame, asks the detector about it and
//! reacts:
//!
//! ```text
//! CameraSource -> Frame -> DetectionFilter -> DetectionOutcome -> ControlLoop -> HardwareMotorDriver
//! ```
//!
//! The loop owns the motor driver and the camera for the whole run and
//! releases both on every exit path (target detected, cancellation, fault).
//!
//! # Module Structure
//!
//! - `motor`: GPIO/PWM motor driver and platform backends
//! - `camera`: capture devices, index auto-detection, frame normalization
//! - `detect`: detector trait, confidence/class filter, YOLOv8 backends
//! - `control`: the loop state machine, cancellation and injectable time
//! - `config`: file + environment configuration
//! - `events`: structured telemetry
//! - `error`: typed error taxonomy and exit codes

pub mod camera;
pub mod config;
pub mod control;
pub mod detect;
pub mod error;
pub mod events;
pub mod frame;
pub mod motor;

pub use camera::{CameraConfig, CameraSource, CaptureBackend, CaptureDevice, SyntheticCapture};
pub use config::SentryConfig;
pub use control::{
    CancelToken, ControlLoop, LoopOutcome, LoopReport, LoopSettings, LoopState, Sleeper,
    ThreadSleeper,
};
pub use detect::{
    load_detector, DetectionConfig, DetectionFilter, DetectionOutcome, ObjectDetector,
    RawDetection,
};
pub use error::{SentryError, SentryResult};
pub use events::{EventSink, LogSink, MemorySink, SentryEvent};
pub use frame::Frame;
pub use motor::{
    Direction, GpioChip, GpioMode, HardwareMotorDriver, MotorCommand, MotorPins, SimulatedGpio,
    Speed,
};

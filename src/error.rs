//! Error taxonomy for the control loop.
//!
//! Backends report failures as `anyhow::Error`; the component boundaries
//! (driver, camera, filter, loop) convert them into a `SentryError` so callers
//! can tell initialization faults from runtime faults and map them to exit codes.

use thiserror::Error;

pub type SentryResult<T> = std::result::Result<T, SentryError>;

#[derive(Error, Debug)]
pub enum SentryError {
    #[error("hardware init failed: {0}")]
    HardwareInit(String),

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("frame read failed: {0}")]
    FrameRead(String),

    #[error("hardware fault: {0}")]
    HardwareFault(String),

    /// Inference failed for one frame. The loop recovers from this locally.
    #[error("detection failed: {0}")]
    Detection(String),
}

impl SentryError {
    /// Wraps an `anyhow` chain, keeping every context layer in the message.
    pub(crate) fn chain(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }

    /// True for errors raised before the loop reaches `Running`.
    pub fn is_initialization(&self) -> bool {
        matches!(
            self,
            SentryError::HardwareInit(_)
                | SentryError::CameraUnavailable(_)
                | SentryError::ModelLoad(_)
                | SentryError::Config(_)
        )
    }

    /// Process exit code for a CLI wrapper: 1 for init faults, 2 for runtime I/O.
    pub fn exit_code(&self) -> i32 {
        if self.is_initialization() {
            1
        } else {
            2
        }
    }
}

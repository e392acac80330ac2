use anyhow::Result;

use crate::frame::Frame;

use super::result::RawDetection;

/// Object detector capability consumed by the control loop.
///
/// The loop borrows a detector for its lifetime and never loads or owns the
/// model itself. Implementations must not retain the frame beyond `detect`.
pub trait ObjectDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one frame. Detections are returned in model output order.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, called once while the loop initializes.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

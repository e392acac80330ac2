mod backend;
pub mod backends;
mod filter;
mod result;

pub use backend::ObjectDetector;
pub use backends::{load_detector, StubDetector, StubResponse, STUB_MODEL_PATH};
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use filter::{DetectionConfig, DetectionFilter};
pub use result::{BoundingBox, DetectionOutcome, RawDetection};

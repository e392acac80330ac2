mod coco;
mod stub;
pub mod yolo;

#[cfg(feature = "backend-tract")]
mod tract;

pub use coco::{class_name, COCO_CLASSES};
pub use stub::{StubDetector, StubResponse};

#[cfg(feature = "backend-tract")]
pub use tract::TractDetector;

use crate::detect::backend::ObjectDetector;
use crate::error::{SentryError, SentryResult};

/// `model_path` value that selects the stub detector instead of a model file.
pub const STUB_MODEL_PATH: &str = "stub://";

/// Build the detector named by `model_path`.
///
/// `stub://` yields an empty `StubDetector`. Anything else is treated as an
/// ONNX file and needs the `backend-tract` feature.
pub fn load_detector(model_path: &str) -> SentryResult<Box<dyn ObjectDetector>> {
    if model_path == STUB_MODEL_PATH {
        log::warn!("detector: using stub backend, nothing will ever be detected");
        return Ok(Box::new(StubDetector::new()));
    }
    load_model_file(model_path)
}

#[cfg(feature = "backend-tract")]
fn load_model_file(model_path: &str) -> SentryResult<Box<dyn ObjectDetector>> {
    if !std::path::Path::new(model_path).is_file() {
        return Err(SentryError::ModelLoad(format!(
            "model file {} does not exist",
            model_path
        )));
    }
    let detector = TractDetector::new(model_path)
        .map_err(|err| SentryError::ModelLoad(SentryError::chain(&err)))?;
    log::info!("detector: loaded {}", model_path);
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model_file(model_path: &str) -> SentryResult<Box<dyn ObjectDetector>> {
    Err(SentryError::ModelLoad(format!(
        "cannot load {}: built without the backend-tract feature",
        model_path
    )))
}

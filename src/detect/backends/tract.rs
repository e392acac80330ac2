#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use super::yolo::{decode, letterbox, INPUT_SIZE};
use crate::detect::backend::ObjectDetector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Candidates scoring below this never reach NMS.
const DEFAULT_MIN_SCORE: f32 = 0.01;

/// YOLOv8 ONNX detector running on tract.
///
/// Loads a local model file once; no network I/O. Frames of any size are
/// letterboxed to the 640x640 model input.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    min_score: f32,
}

impl TractDetector {
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, INPUT_SIZE, INPUT_SIZE)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            min_score: DEFAULT_MIN_SCORE,
        })
    }
}

impl ObjectDetector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let (input, geometry) = letterbox(frame, INPUT_SIZE)?;
        let input = tract_ndarray::Array4::from_shape_vec((1, 3, INPUT_SIZE, INPUT_SIZE), input)
            .context("failed to shape model input")?
            .into_tensor();
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let values: Vec<f32> = view.iter().copied().collect();
        decode(&values, &shape, &geometry, self.min_score)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(INPUT_SIZE as u32, INPUT_SIZE as u32, 0, 0)?;
        self.detect(&blank).map(|_| ())
    }
}

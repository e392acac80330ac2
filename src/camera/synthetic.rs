//! Synthetic capture backend.
//!
//! Produces deterministic RGB frames without any device. Used for dry runs
//! (`camera_backend = "synthetic"`) and tests.

use anyhow::{anyhow, Result};

use super::{CaptureBackend, CaptureDevice};
use crate::frame::Frame;

pub struct SyntheticCapture {
    indices: Vec<u32>,
}

impl SyntheticCapture {
    /// A backend exposing a single camera at index 0.
    pub fn new() -> Self {
        Self::with_indices(vec![0])
    }

    pub fn with_indices(indices: Vec<u32>) -> Self {
        Self { indices }
    }
}

impl Default for SyntheticCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SyntheticCapture {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        if !self.indices.contains(&index) {
            return Err(anyhow!("synthetic camera {} does not exist", index));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic camera needs a non-zero resolution"));
        }
        log::info!("synthetic camera {} opened ({}x{})", index, width, height);
        Ok(Box::new(SyntheticDevice {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
            open: true,
        }))
    }
}

struct SyntheticDevice {
    width: u32,
    height: u32,
    frame_count: u64,
    /// Changes every 50 frames to simulate a scene change.
    scene_state: u8,
    open: bool,
}

impl SyntheticDevice {
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixel_count = self.width as usize * self.height as usize * 3;
        (0..pixel_count)
            .map(|i| ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8)
            .collect()
    }
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("synthetic camera closed"));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, self.frame_count)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        self.open = false;
    }
}

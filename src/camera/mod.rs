//! Camera acquisition.
//!
//! `CameraSource` owns exactly one open capture device. Opening can either
//! target a configured index or probe indices in ascending order until one
//! both opens and returns a test frame. Every probed device that is not kept
//! is closed before the next index is tried, so no camera stays locked.
//!
//! Backends:
//! - V4L2 devices (feature: camera-v4l2)
//! - Synthetic in-memory cameras (dry runs, tests)

#[cfg(feature = "camera-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::error::{SentryError, SentryResult};
use crate::frame::Frame;

pub use synthetic::SyntheticCapture;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Capture;

/// Indices probed by auto-detection: `0..AUTO_DETECT_PROBE_COUNT`.
pub const AUTO_DETECT_PROBE_COUNT: u32 = 5;

/// Indices listed by the `cameras` diagnostic.
pub const DIAGNOSTIC_PROBE_COUNT: u32 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConfig {
    pub preferred_index: u32,
    /// Requested width. The device may negotiate something else.
    pub width: u32,
    /// Requested height. The device may negotiate something else.
    pub height: u32,
    pub auto_detect: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preferred_index: 1,
            width: 640,
            height: 480,
            auto_detect: true,
        }
    }
}

/// Opens capture devices by index.
pub trait CaptureBackend {
    fn name(&self) -> &'static str;

    fn open(&mut self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>>;
}

/// An open capture device.
pub trait CaptureDevice {
    /// Block until a frame is available.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Negotiated resolution.
    fn resolution(&self) -> (u32, u32);

    /// Release the device. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Result of probing one index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeReport {
    pub index: u32,
    pub opened: bool,
    pub frame_ok: bool,
    pub resolution: Option<(u32, u32)>,
    pub error: Option<String>,
}

impl ProbeReport {
    pub fn working(&self) -> bool {
        self.opened && self.frame_ok
    }
}

pub struct CameraSource {
    config: CameraConfig,
    index: u32,
    resolution: (u32, u32),
    device: Option<Box<dyn CaptureDevice>>,
    frames_read: u64,
}

impl CameraSource {
    /// Open a camera per `config`.
    pub fn open(config: CameraConfig, backend: &mut dyn CaptureBackend) -> SentryResult<Self> {
        let candidates = candidate_indices(&config);
        if config.auto_detect {
            log::info!(
                "auto-detecting cameras on {} (indices {:?})",
                backend.name(),
                candidates
            );
        }

        let mut failures = Vec::new();
        for index in candidates {
            match open_verified(backend, index, config.width, config.height) {
                Ok((device, _test_frame)) => {
                    let resolution = device.resolution();
                    if resolution != (config.width, config.height) {
                        log::warn!(
                            "camera {} negotiated {}x{} (requested {}x{})",
                            index,
                            resolution.0,
                            resolution.1,
                            config.width,
                            config.height
                        );
                    }
                    log::info!(
                        "camera opened at index {} ({}x{})",
                        index,
                        resolution.0,
                        resolution.1
                    );
                    return Ok(Self {
                        config,
                        index,
                        resolution,
                        device: Some(device),
                        frames_read: 0,
                    });
                }
                Err(err) => {
                    log::debug!("camera index {} rejected: {:#}", index, err);
                    failures.push(format!("index {}: {:#}", index, err));
                }
            }
        }

        Err(SentryError::CameraUnavailable(if config.auto_detect {
            format!("no camera yielded a frame ({})", failures.join("; "))
        } else {
            failures.join("; ")
        }))
    }

    /// Read one frame. Blocks until the device delivers or fails.
    pub fn read_frame(&mut self) -> SentryResult<Frame> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| SentryError::FrameRead("camera already closed".into()))?;
        let frame = device.read_frame().map_err(|err| {
            SentryError::FrameRead(format!("camera {}: {}", self.index, SentryError::chain(&err)))
        })?;
        self.frames_read += 1;
        Ok(frame)
    }

    /// Release the device. Returns `false` if it was already closed.
    pub fn close(&mut self) -> bool {
        let Some(mut device) = self.device.take() else {
            return false;
        };
        device.close();
        log::info!(
            "camera {} released after {} frames",
            self.index,
            self.frames_read
        );
        true
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Try every index in `indices`, closing each device after the check.
    pub fn probe(
        backend: &mut dyn CaptureBackend,
        indices: std::ops::Range<u32>,
        width: u32,
        height: u32,
    ) -> Vec<ProbeReport> {
        indices
            .map(|index| match backend.open(index, width, height) {
                Ok(mut device) => {
                    let resolution = Some(device.resolution());
                    let read = device.read_frame();
                    device.close();
                    ProbeReport {
                        index,
                        opened: true,
                        frame_ok: read.is_ok(),
                        resolution,
                        error: read.err().map(|err| format!("{:#}", err)),
                    }
                }
                Err(err) => ProbeReport {
                    index,
                    opened: false,
                    frame_ok: false,
                    resolution: None,
                    error: Some(format!("{:#}", err)),
                },
            })
            .collect()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("index", &self.index)
            .field("resolution", &self.resolution)
            .field("open", &self.is_open())
            .finish()
    }
}

fn candidate_indices(config: &CameraConfig) -> Vec<u32> {
    if !config.auto_detect {
        return vec![config.preferred_index];
    }
    let mut indices: Vec<u32> = (0..AUTO_DETECT_PROBE_COUNT).collect();
    if config.preferred_index >= AUTO_DETECT_PROBE_COUNT {
        indices.push(config.preferred_index);
    }
    indices
}

/// Open `index` and read a test frame. The device is closed if the read fails.
fn open_verified(
    backend: &mut dyn CaptureBackend,
    index: u32,
    width: u32,
    height: u32,
) -> Result<(Box<dyn CaptureDevice>, Frame)> {
    let mut device = backend.open(index, width, height)?;
    match device.read_frame() {
        Ok(frame) => Ok((device, frame)),
        Err(err) => {
            device.close();
            Err(anyhow!("opened but test frame failed: {:#}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Missing,
        NoFrame,
        Working,
    }

    #[derive(Default)]
    struct Ledger {
        opens: HashMap<u32, u32>,
        closes: HashMap<u32, u32>,
    }

    struct FakeBackend {
        behaviours: HashMap<u32, Behaviour>,
        ledger: Rc<RefCell<Ledger>>,
    }

    impl FakeBackend {
        fn new(behaviours: &[(u32, Behaviour)]) -> Self {
            Self {
                behaviours: behaviours.iter().copied().collect(),
                ledger: Rc::default(),
            }
        }

        fn open_devices(&self) -> Vec<u32> {
            let ledger = self.ledger.borrow();
            let mut open: Vec<u32> = ledger
                .opens
                .iter()
                .filter(|&(index, opens)| ledger.closes.get(index).copied().unwrap_or(0) < *opens)
                .map(|(index, _)| *index)
                .collect();
            open.sort_unstable();
            open
        }
    }

    struct FakeDevice {
        index: u32,
        frame_ok: bool,
        closed: bool,
        ledger: Rc<RefCell<Ledger>>,
    }

    impl CaptureBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn open(&mut self, index: u32, _width: u32, _height: u32) -> Result<Box<dyn CaptureDevice>> {
            let behaviour = self
                .behaviours
                .get(&index)
                .copied()
                .unwrap_or(Behaviour::Missing);
            if matches!(behaviour, Behaviour::Missing) {
                return Err(anyhow!("no device at index {}", index));
            }
            *self.ledger.borrow_mut().opens.entry(index).or_default() += 1;
            Ok(Box::new(FakeDevice {
                index,
                frame_ok: matches!(behaviour, Behaviour::Working),
                closed: false,
                ledger: self.ledger.clone(),
            }))
        }
    }

    impl CaptureDevice for FakeDevice {
        fn read_frame(&mut self) -> Result<Frame> {
            if self.frame_ok {
                Frame::filled(4, 2, 0, 1)
            } else {
                Err(anyhow!("select timeout"))
            }
        }

        fn resolution(&self) -> (u32, u32) {
            (4, 2)
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                *self.ledger.borrow_mut().closes.entry(self.index).or_default() += 1;
            }
        }
    }

    impl Drop for FakeDevice {
        fn drop(&mut self) {
            self.close();
        }
    }

    fn auto_config() -> CameraConfig {
        CameraConfig {
            preferred_index: 1,
            width: 640,
            height: 480,
            auto_detect: true,
        }
    }

    #[test]
    fn auto_detect_picks_first_index_with_a_frame() -> SentryResult<()> {
        let mut backend = FakeBackend::new(&[
            (0, Behaviour::NoFrame),
            (1, Behaviour::NoFrame),
            (2, Behaviour::Working),
            (3, Behaviour::Working),
        ]);
        let camera = CameraSource::open(auto_config(), &mut backend)?;

        assert_eq!(camera.index(), 2);
        assert_eq!(camera.resolution(), (4, 2));
        // Index 3 is never opened; 0 and 1 were closed after failing the test read.
        assert_eq!(backend.open_devices(), vec![2]);
        assert!(!backend.ledger.borrow().opens.contains_key(&3));
        Ok(())
    }

    #[test]
    fn auto_detect_fails_when_nothing_reads() {
        let mut backend = FakeBackend::new(&[(0, Behaviour::NoFrame), (4, Behaviour::NoFrame)]);
        let err = CameraSource::open(auto_config(), &mut backend).unwrap_err();
        assert!(matches!(err, SentryError::CameraUnavailable(_)));
        assert!(backend.open_devices().is_empty());
    }

    #[test]
    fn auto_detect_falls_back_to_preferred_index_outside_probe_range() -> SentryResult<()> {
        let mut backend = FakeBackend::new(&[(7, Behaviour::Working)]);
        let config = CameraConfig {
            preferred_index: 7,
            ..auto_config()
        };
        let camera = CameraSource::open(config, &mut backend)?;
        assert_eq!(camera.index(), 7);
        Ok(())
    }

    #[test]
    fn explicit_index_does_not_probe() {
        let mut backend = FakeBackend::new(&[(0, Behaviour::Working), (1, Behaviour::Missing)]);
        let config = CameraConfig {
            auto_detect: false,
            ..auto_config()
        };
        let err = CameraSource::open(config, &mut backend).unwrap_err();
        assert!(matches!(err, SentryError::CameraUnavailable(_)));
        assert!(backend.ledger.borrow().opens.is_empty());
    }

    #[test]
    fn close_is_idempotent_and_blocks_reads() -> SentryResult<()> {
        let mut backend = FakeBackend::new(&[(1, Behaviour::Working)]);
        let config = CameraConfig {
            auto_detect: false,
            ..auto_config()
        };
        let mut camera = CameraSource::open(config, &mut backend)?;
        camera.read_frame()?;

        assert!(camera.close());
        assert!(!camera.close());
        drop(camera);
        assert_eq!(backend.ledger.borrow().closes.get(&1), Some(&1));

        Ok(())
    }

    #[test]
    fn probe_reports_each_index_and_leaves_nothing_open() {
        let mut backend = FakeBackend::new(&[(0, Behaviour::Working), (1, Behaviour::NoFrame)]);
        let reports = CameraSource::probe(&mut backend, 0..3, 640, 480);

        assert_eq!(reports.len(), 3);
        assert!(reports[0].working());
        assert!(reports[1].opened && !reports[1].frame_ok);
        assert!(!reports[2].opened);
        assert!(backend.open_devices().is_empty());
    }
}

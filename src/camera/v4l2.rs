//! V4L2 capture backend.
//!
//! Index `n` maps to `/dev/video{n}`. The device is asked for RGB3 at the
//! requested resolution; whatever it negotiates instead (YUYV, or MJPG with
//! the camera-mjpeg feature) is normalized to RGB24 per frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureBackend, CaptureDevice};
use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Capture {
    path_prefix: String,
}

impl V4l2Capture {
    pub fn new() -> Self {
        Self::with_prefix("/dev/video")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: prefix.into(),
        }
    }

    fn device_path(&self, index: u32) -> String {
        format!("{}{}", self.path_prefix, index)
    }
}

impl Default for V4l2Capture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for V4l2Capture {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&mut self, index: u32, width: u32, height: u32) -> Result<Box<dyn CaptureDevice>> {
        let path = self.device_path(index);
        let device = V4l2Device::connect(&path, width, height)?;
        Ok(Box::new(device))
    }
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Device {
    path: String,
    state: Option<StreamState>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Device {
    fn connect(path: &str, width: u32, height: u32) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "{} negotiated unsupported pixel format {}",
                path,
                format.fourcc
            )
        })?;

        let state = StreamStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2: connected to {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path: path.to_string(),
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CaptureDevice for V4l2Device {
    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .with_context(|| format!("{} is closed", self.path))?;
        let (format, width, height) = (self.format, self.width, self.height);
        let rgb = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let payload = if used == 0 { buf } else { &buf[..used] };
            normalize_to_rgb(payload, width, height, format)
        })?;

        self.frame_count += 1;
        Frame::new(rgb, self.width, self.height, self.frame_count)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::debug!("v4l2: closed {} after {} frames", self.path, self.frame_count);
        }
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        self.close();
    }
}

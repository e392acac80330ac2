//! Captured frame container.
//!
//! Every capture backend normalizes to packed RGB24 before handing a `Frame`
//! to the loop, so detectors only ever deal with one pixel layout.

use anyhow::{anyhow, Result};

/// One RGB24 frame read from a camera.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-source sequence number, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame, checking that `data` holds exactly `width * height` RGB pixels.
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
        })
    }

    /// A uniformly filled frame.
    pub fn filled(width: u32, height: u32, value: u8, sequence: u64) -> Result<Self> {
        let len = rgb_len(width, height)?;
        Self::new(vec![value; len], width, height, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 1).is_ok());
    }

    #[test]
    fn filled_frame_is_packed_rgb() -> Result<()> {
        let frame = Frame::filled(3, 2, 9, 7)?;
        assert_eq!(frame.pixels().len(), 18);
        assert!(frame.pixels().iter().all(|&byte| byte == 9));
        assert_eq!(frame.sequence, 7);
        Ok(())
    }
}

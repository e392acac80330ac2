use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
    #[cfg(feature = "camera-mjpeg")]
    Mjpeg,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(PixelFormat::Rgb24),
            b"YUYV" => Some(PixelFormat::Yuyv),
            #[cfg(feature = "camera-mjpeg")]
            b"MJPG" => Some(PixelFormat::Mjpeg),
            _ => None,
        }
    }
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = expected_len(width, height, 3)?;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        #[cfg(feature = "camera-mjpeg")]
        PixelFormat::Mjpeg => mjpeg_to_rgb(pixels, width, height),
    }
}

fn expected_len(width: u32, height: u32, bytes_per_pixel: usize) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(bytes_per_pixel))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// Packed 4:2:2, two pixels per macropixel: Y0 U Y1 V.
fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let expected = expected_len(width, height, 2)?;
    if width % 2 != 0 {
        return Err(anyhow!("YUYV width must be even, got {}", width));
    }
    if pixels.len() != expected {
        return Err(anyhow!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = Vec::with_capacity(expected_len(width, height, 3)?);
    for macro_pixel in pixels.chunks_exact(4) {
        let u = macro_pixel[1] as f32 - 128.0;
        let v = macro_pixel[3] as f32 - 128.0;
        for y in [macro_pixel[0], macro_pixel[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Ok(rgb)
}

#[cfg(feature = "camera-mjpeg")]
fn mjpeg_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(pixels, image::ImageFormat::Jpeg)
        .map_err(|err| anyhow!("decode MJPG frame: {}", err))?
        .to_rgb8();
    if decoded.width() != width || decoded.height() != height {
        return Err(anyhow!(
            "MJPG frame is {}x{}, expected {}x{}",
            decoded.width(),
            decoded.height(),
            width,
            height
        ));
    }
    Ok(decoded.into_raw())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_produces_gray() -> Result<()> {
        let yuyv = [128u8, 128, 128, 128, 64, 128, 64, 128];
        let rgb = normalize_to_rgb(&yuyv, 4, 1, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![128, 128, 128, 128, 128, 128, 64, 64, 64, 64, 64, 64]);
        Ok(())
    }

    #[test]
    fn yuyv_rejects_short_buffers() {
        assert!(normalize_to_rgb(&[0u8; 6], 4, 1, PixelFormat::Yuyv).is_err());
    }

    #[test]
    fn rgb_pass_through_validates_length() -> Result<()> {
        let pixels = vec![1u8; 9];
        let rgb = normalize_to_rgb(&pixels, 1, 3, PixelFormat::Rgb24)?;
        assert_eq!(rgb, pixels);
        assert!(normalize_to_rgb(&pixels, 2, 2, PixelFormat::Rgb24).is_err());
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(PixelFormat::from_fourcc(b"RGB3"), Some(PixelFormat::Rgb24));
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }
}

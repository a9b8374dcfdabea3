use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Yuyv => 2,
        }
    }
}

/// Convert one driver buffer to tightly packed RGB24.
///
/// `stride` is the driver's `bytesperline`; 0 means rows are unpadded.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    let pixel_count = width
        .checked_mul(height)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))? as usize;
    if format == PixelFormat::Yuyv && width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width"));
    }
    let row_bytes = width as usize * format.bytes_per_pixel();
    let packed = pack_rows(pixels, height as usize, row_bytes, stride as usize)?;
    match format {
        PixelFormat::Rgb24 => Ok(packed),
        PixelFormat::Yuyv => Ok(yuyv_to_rgb(&packed, pixel_count)),
    }
}

/// Drop per-row padding so each row is exactly `row_bytes` long.
fn pack_rows(pixels: &[u8], height: usize, row_bytes: usize, stride: usize) -> Result<Vec<u8>> {
    let stride = if stride == 0 { row_bytes } else { stride };
    if stride < row_bytes {
        return Err(anyhow!(
            "row stride {} is shorter than {} bytes of pixels",
            stride,
            row_bytes
        ));
    }
    let expected = stride
        .checked_mul(height)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "frame buffer too short: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    if stride == row_bytes {
        return Ok(pixels[..expected].to_vec());
    }

    let mut packed = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        packed.extend_from_slice(
            pixels
                .get(start..start + row_bytes)
                .context("frame buffer row is out of bounds")?,
        );
    }
    Ok(packed)
}

fn yuyv_to_rgb(packed: &[u8], pixel_count: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for quad in packed.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_yuyv_is_gray() -> Result<()> {
        let yuyv = [100u8, 128, 200, 128];
        let rgb = normalize_to_rgb(&yuyv, 2, 1, 0, PixelFormat::Yuyv)?;
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
        Ok(())
    }

    #[test]
    fn rgb_rows_drop_per_row_padding() -> Result<()> {
        let padded = [1u8, 1, 1, 2, 2, 2, 0, 0, 3, 3, 3, 4, 4, 4, 0, 0];
        let rgb = normalize_to_rgb(&padded, 2, 2, 8, PixelFormat::Rgb24)?;
        assert_eq!(rgb, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
        Ok(())
    }

    #[test]
    fn yuyv_rows_drop_per_row_padding() -> Result<()> {
        let padded = [50u8, 128, 60, 128, 9, 9, 70, 128, 80, 128, 9, 9];
        let rgb = normalize_to_rgb(&padded, 2, 2, 6, PixelFormat::Yuyv)?;
        assert_eq!(
            rgb,
            vec![50, 50, 50, 60, 60, 60, 70, 70, 70, 80, 80, 80]
        );
        Ok(())
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(normalize_to_rgb(&[0u8; 5], 2, 1, 0, PixelFormat::Rgb24).is_err());
        assert!(normalize_to_rgb(&[0u8; 3], 2, 1, 0, PixelFormat::Yuyv).is_err());
        // Two padded rows need 16 bytes even though 12 hold the pixels.
        assert!(normalize_to_rgb(&[0u8; 12], 2, 2, 8, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn stride_narrower_than_row_is_rejected() {
        assert!(normalize_to_rgb(&[0u8; 12], 2, 2, 4, PixelFormat::Rgb24).is_err());
    }

    #[test]
    fn fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(b"YUYV"), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(b"MJPG"), None);
    }
}

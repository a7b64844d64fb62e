//! Interleaved 8-bit pixel buffers

use crate::error::TransformError;

/// Largest channel count a raster may carry (RGBA)
pub const MAX_CHANNELS: usize = 4;

/// Row-major, interleaved 8-bit image with 1 to 4 channels.
///
/// Pixel (x, y) starts at byte `(y * width + x) * channels`; the origin is
/// the top-left corner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
}

impl Raster {
    /// Wrap an existing buffer, checking that its length matches the shape
    pub fn new(
        width: u32,
        height: u32,
        channels: usize,
        data: Vec<u8>,
    ) -> Result<Self, TransformError> {
        check_shape(width, height, channels)?;
        let expected = width as usize * height as usize * channels;
        if data.len() != expected {
            return Err(TransformError::InvalidDimensions(format!(
                "buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self { width, height, channels, data })
    }

    /// A raster where every pixel is `value` (truncated or zero-padded to
    /// the channel count)
    pub fn filled(
        width: u32,
        height: u32,
        channels: usize,
        value: &[u8],
    ) -> Result<Self, TransformError> {
        check_shape(width, height, channels)?;
        let pixel = pixel_value(value, channels);
        let data = pixel[..channels]
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * channels)
            .collect();
        Ok(Self { width, height, channels, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Bytes per row
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * self.channels
    }

    /// Channels of pixel (x, y), or `None` outside the raster
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = y as usize * self.stride() + x as usize * self.channels;
        Some(&self.data[offset..offset + self.channels])
    }

    /// Bilinear interpolation at a sub-pixel position.
    ///
    /// The caller guarantees `0 <= x < width` and `0 <= y < height`; the right
    /// and bottom neighbours are clamped to the last column and row so the
    /// read never leaves the buffer.
    #[inline]
    pub fn sample_bilinear(&self, x: f64, y: f64) -> [u8; MAX_CHANNELS] {
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.stride();
        let channels = self.channels;

        let x0 = (x.floor() as usize).min(width - 1);
        let y0 = (y.floor() as usize).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let mut result = [0u8; MAX_CHANNELS];

        for c in 0..channels {
            let p00 = self.data[y0 * stride + x0 * channels + c] as f64;
            let p10 = self.data[y0 * stride + x1 * channels + c] as f64;
            let p01 = self.data[y1 * stride + x0 * channels + c] as f64;
            let p11 = self.data[y1 * stride + x1 * channels + c] as f64;

            let value = p00 * (1.0 - fx) * (1.0 - fy)
                + p10 * fx * (1.0 - fy)
                + p01 * (1.0 - fx) * fy
                + p11 * fx * fy;

            result[c] = value.round().clamp(0.0, 255.0) as u8;
        }

        result
    }
}

/// Expand a user-supplied fill value to a full pixel; missing channels are 0
pub fn pixel_value(value: &[u8], channels: usize) -> [u8; MAX_CHANNELS] {
    let mut pixel = [0u8; MAX_CHANNELS];
    let n = value.len().min(channels).min(MAX_CHANNELS);
    pixel[..n].copy_from_slice(&value[..n]);
    pixel
}

fn check_shape(width: u32, height: u32, channels: usize) -> Result<(), TransformError> {
    if width == 0 || height == 0 {
        return Err(TransformError::InvalidDimensions(format!(
            "{}x{} raster is empty",
            width, height
        )));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(TransformError::InvalidDimensions(format!(
            "{} channels not supported",
            channels
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> Raster {
        // 2x2 single channel: 0 100 / 100 200
        Raster::new(2, 2, 1, vec![0, 100, 100, 200]).unwrap()
    }

    #[test]
    fn test_new_checks_length() {
        assert!(Raster::new(2, 2, 3, vec![0; 12]).is_ok());
        assert!(matches!(
            Raster::new(2, 2, 3, vec![0; 11]),
            Err(TransformError::InvalidDimensions(_))
        ));
        assert!(Raster::new(0, 2, 3, Vec::new()).is_err());
        assert!(Raster::new(1, 1, 5, vec![0; 5]).is_err());
    }

    #[test]
    fn test_filled() {
        let r = Raster::filled(3, 2, 3, &[255, 0, 0]).unwrap();
        assert_eq!(r.as_bytes().len(), 18);
        assert_eq!(r.pixel(2, 1), Some(&[255u8, 0, 0][..]));
        assert_eq!(r.pixel(3, 0), None);
    }

    #[test]
    fn test_bilinear_corners_and_center() {
        let r = gradient();
        assert_eq!(r.sample_bilinear(0.0, 0.0)[0], 0);
        assert_eq!(r.sample_bilinear(1.0, 1.0)[0], 200);
        assert_eq!(r.sample_bilinear(0.5, 0.5)[0], 100);
        assert_eq!(r.sample_bilinear(0.5, 0.0)[0], 50);
    }

    #[test]
    fn test_bilinear_clamps_at_last_column() {
        let r = gradient();
        // Between the last column and the edge of the frame
        assert_eq!(r.sample_bilinear(1.5, 0.0)[0], 100);
        assert_eq!(r.sample_bilinear(1.5, 0.5)[0], 150);
        assert_eq!(r.sample_bilinear(1.9, 1.9)[0], 200);
    }

    #[test]
    fn test_pixel_value_padding() {
        assert_eq!(pixel_value(&[1, 2], 4), [1, 2, 0, 0]);
        assert_eq!(pixel_value(&[1, 2, 3, 4], 3), [1, 2, 3, 0]);
    }
}

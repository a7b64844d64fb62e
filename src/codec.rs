//! Image decoding and encoding at the service boundary

use base64::Engine as _;
use image::{DynamicImage, ImageBuffer, ImageOutputFormat, Rgb, Rgba};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::error::TransformError;
use crate::raster::Raster;

/// Container format of the transformed image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
        }
    }
}

/// Text encoding of the image bytes in JSON responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    /// Lowercase hex, what the browser client decodes
    #[default]
    Hex,
    Base64,
}

impl PayloadEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadEncoding::Hex => "hex",
            PayloadEncoding::Base64 => "base64",
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            PayloadEncoding::Hex => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
            PayloadEncoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Decode an uploaded image.
///
/// Images carrying alpha become 4-channel rasters, everything else RGB.
pub fn decode(bytes: &[u8]) -> Result<Raster, TransformError> {
    let img = image::load_from_memory(bytes).map_err(TransformError::Decode)?;

    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        Raster::new(w, h, 4, rgba.into_raw())
    } else {
        let rgb = img.to_rgb8();
        let (w, h) = rgb.dimensions();
        Raster::new(w, h, 3, rgb.into_raw())
    }
}

/// Encode a raster; JPEG output drops any alpha channel
pub fn encode(
    raster: &Raster,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, TransformError> {
    let img = to_dynamic(raster)?;

    let (img, format) = match format {
        OutputFormat::Jpeg => (
            DynamicImage::ImageRgb8(img.to_rgb8()),
            ImageOutputFormat::Jpeg(jpeg_quality),
        ),
        OutputFormat::Png => (img, ImageOutputFormat::Png),
    };

    let mut data = Vec::new();
    img.write_to(&mut Cursor::new(&mut data), format)
        .map_err(TransformError::Encode)?;

    Ok(data)
}

fn to_dynamic(raster: &Raster) -> Result<DynamicImage, TransformError> {
    let (w, h) = (raster.width(), raster.height());
    let data = raster.as_bytes().to_vec();
    let img = match raster.channels() {
        1 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
        2 => ImageBuffer::from_raw(w, h, data).map(DynamicImage::ImageLumaA8),
        3 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
        _ => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
    };
    img.ok_or_else(|| {
        TransformError::InvalidDimensions(format!("cannot encode {}x{} raster", w, h))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> Raster {
        let mut data = Vec::new();
        for y in 0..8u32 {
            for x in 0..6u32 {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                data.extend_from_slice(&[v, v, v]);
            }
        }
        Raster::new(6, 8, 3, data).unwrap()
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let raster = checker();
        let bytes = encode(&raster, OutputFormat::Png, 95).unwrap();
        assert_eq!(decode(&bytes).unwrap(), raster);
    }

    #[test]
    fn test_jpeg_keeps_dimensions_and_drops_alpha() {
        let raster = Raster::filled(5, 7, 4, &[20, 40, 60, 128]).unwrap();
        let bytes = encode(&raster, OutputFormat::Jpeg, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = decode(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height(), decoded.channels()), (5, 7, 3));
    }

    #[test]
    fn test_png_alpha_decodes_to_four_channels() {
        let raster = Raster::filled(3, 3, 4, &[1, 2, 3, 4]).unwrap();
        let bytes = encode(&raster, OutputFormat::Png, 95).unwrap();
        assert_eq!(decode(&bytes).unwrap().channels(), 4);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let err = decode(b"definitely not an image").unwrap_err();
        assert_eq!(err.code(), "decode_error");
    }

    #[test]
    fn test_payload_encodings() {
        assert_eq!(PayloadEncoding::Hex.encode(&[0x00, 0xab, 0xff]), "00abff");
        assert_eq!(PayloadEncoding::Base64.encode(b"hi"), "aGk=");
    }
}

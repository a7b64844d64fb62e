//! Error types for the homography engine

use thiserror::Error;

/// Failure of a single transform request.
///
/// Every variant is terminal for the request: the engine never returns a
/// partial raster. Each variant carries a stable machine-readable code via
/// [`TransformError::code`] so callers can show a specific message.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Not exactly four point correspondences were supplied
    #[error("exactly 4 points are required, got {0}")]
    InvalidCount(usize),

    /// Points coincide, are collinear, or are not finite
    #[error("degenerate point configuration: {0}")]
    DegenerateInput(String),

    /// A pivot of the 8x8 system fell below tolerance during elimination
    #[error("homography system is singular (pivot {pivot:e} at column {column})")]
    SingularSystem { column: usize, pivot: f64 },

    /// The 3x3 homography cannot be inverted
    #[error("homography matrix is singular (determinant {0:e})")]
    SingularMatrix(f64),

    /// Raster or output dimensions are unusable
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// The uploaded payload could not be decoded as an image
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// The output raster could not be encoded
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

impl TransformError {
    /// Stable code reported to API consumers
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::InvalidCount(_) => "invalid_count",
            TransformError::DegenerateInput(_) => "degenerate_input",
            TransformError::SingularSystem { .. } => "singular_system",
            TransformError::SingularMatrix(_) => "singular_matrix",
            TransformError::InvalidDimensions(_) => "invalid_dimensions",
            TransformError::Decode(_) => "decode_error",
            TransformError::Encode(_) => "encode_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            TransformError::InvalidCount(3),
            TransformError::DegenerateInput("collinear".into()),
            TransformError::SingularSystem { column: 2, pivot: 0.0 },
            TransformError::SingularMatrix(0.0),
            TransformError::InvalidDimensions("0x0".into()),
        ];
        let codes: HashSet<_> = errors.iter().map(|e| e.code()).collect();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_count_message() {
        let err = TransformError::InvalidCount(5);
        assert_eq!(err.to_string(), "exactly 4 points are required, got 5");
    }
}

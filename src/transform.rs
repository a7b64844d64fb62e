//! Perspective transformation of rasters
//!
//! This module ties the pieces together: validate the four correspondences,
//! solve the homography, invert it, then fill the output by inverse mapping.
//! Every destination pixel is mapped back into the source and sampled with
//! bilinear interpolation, so the output has no holes. Rows are warped in
//! parallel with rayon.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransformError;
use crate::geometry::{validate_correspondences, Correspondence};
use crate::homography::HomographyMatrix;
use crate::raster::{Raster, MAX_CHANNELS};

/// Source coordinates this close outside the frame are snapped onto its edge
const EDGE_EPSILON: f64 = 1e-6;

/// Numeric thresholds used while validating, solving and inverting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Tolerances {
    /// Smallest pivot accepted during elimination
    pub pivot: f64,
    /// Smallest |determinant| accepted when inverting
    pub determinant: f64,
    /// Largest sine between two edges still counted as collinear
    pub collinearity: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            pivot: 1e-10,
            determinant: 1e-10,
            collinearity: 1e-9,
        }
    }
}

/// Per-request options for [`transform`]
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    /// Value written to output pixels that map outside the source
    pub fill: [u8; MAX_CHANNELS],
    pub tolerances: Tolerances,
}

/// A solved homography together with its inverse
#[derive(Debug, Clone)]
pub struct PerspectiveTransform {
    matrix: HomographyMatrix,
    inverse: HomographyMatrix,
}

impl PerspectiveTransform {
    /// Validate four correspondences and solve the forward and inverse maps
    pub fn compute(
        correspondences: &[Correspondence],
        tolerances: &Tolerances,
    ) -> Result<Self, TransformError> {
        let quad = validate_correspondences(correspondences, tolerances.collinearity)?;
        let matrix = HomographyMatrix::from_correspondences(&quad, tolerances.pivot)?;
        let inverse = matrix.inverse(tolerances.determinant)?;

        Ok(Self { matrix, inverse })
    }

    pub fn matrix(&self) -> &HomographyMatrix {
        &self.matrix
    }

    /// Transform a point from source to destination coordinates
    #[inline]
    pub fn transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.matrix.apply(x, y)
    }

    /// Transform a point from destination to source coordinates
    #[inline]
    pub fn inverse_transform_point(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        self.inverse.apply(x, y)
    }

    /// Resample `src` into a new `width` x `height` raster.
    ///
    /// Pixels whose source position falls outside `[0, w) x [0, h)` (or at
    /// infinity) keep the fill value.
    pub fn warp(
        &self,
        src: &Raster,
        width: u32,
        height: u32,
        fill: &[u8; MAX_CHANNELS],
    ) -> Result<Raster, TransformError> {
        let channels = src.channels();
        let mut dst = Raster::filled(width, height, channels, fill)?;
        let stride = dst.stride();

        let src_w = src.width() as f64;
        let src_h = src.height() as f64;

        dst.as_bytes_mut()
            .par_chunks_mut(stride)
            .enumerate()
            .for_each(|(dst_y, row)| {
                for (dst_x, pixel) in row.chunks_exact_mut(channels).enumerate() {
                    let Some((src_x, src_y)) =
                        self.source_position(dst_x as f64, dst_y as f64, src_w, src_h)
                    else {
                        continue;
                    };
                    let value = src.sample_bilinear(src_x, src_y);
                    pixel.copy_from_slice(&value[..channels]);
                }
            });

        Ok(dst)
    }

    /// Map a destination pixel back into the source frame, or `None` when it
    /// lands outside
    #[inline]
    fn source_position(&self, x: f64, y: f64, src_w: f64, src_h: f64) -> Option<(f64, f64)> {
        let (sx, sy) = self.inverse_transform_point(x, y)?;
        Some((snap_into(sx, src_w)?, snap_into(sy, src_h)?))
    }
}

#[inline]
fn snap_into(v: f64, limit: f64) -> Option<f64> {
    if v >= 0.0 && v < limit {
        Some(v)
    } else if v < 0.0 && v > -EDGE_EPSILON {
        Some(0.0)
    } else if v >= limit && v < limit + EDGE_EPSILON {
        Some(limit - 1.0)
    } else {
        None
    }
}

/// Warp `source` so that each correspondence's source point lands on its
/// destination point in a `output_width` x `output_height` raster.
///
/// All-or-nothing: on error no raster is produced.
pub fn transform(
    source: &Raster,
    correspondences: &[Correspondence],
    output_width: u32,
    output_height: u32,
    options: &TransformOptions,
) -> Result<Raster, TransformError> {
    if output_width == 0 || output_height == 0 {
        return Err(TransformError::InvalidDimensions(format!(
            "output size {}x{} is empty",
            output_width, output_height
        )));
    }

    let perspective = PerspectiveTransform::compute(correspondences, &options.tolerances)?;
    debug!("Homography: {:?}", perspective.matrix().as_array());

    perspective.warp(source, output_width, output_height, &options.fill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{frame_corners, pair_points, Point2D};

    const RED: [u8; 3] = [255, 0, 0];

    fn quad(points: [(f64, f64); 4]) -> [Point2D; 4] {
        points.map(|(x, y)| Point2D::new(x, y))
    }

    #[test]
    fn test_solid_red_downscale() {
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        let pairs = pair_points(
            &quad([(0.0, 0.0), (3.0, 0.0), (3.0, 3.0), (0.0, 3.0)]),
            &quad([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
        );

        let out = transform(&src, &pairs, 2, 2, &TransformOptions::default()).unwrap();

        assert_eq!((out.width(), out.height(), out.channels()), (2, 2, 3));
        assert_eq!(out, Raster::filled(2, 2, 3, &RED).unwrap());
    }

    #[test]
    fn test_solid_color_has_no_new_colors() {
        let color = [10u8, 200, 30, 255];
        let src = Raster::filled(64, 48, 4, &color).unwrap();
        let pairs = pair_points(
            &quad([(5.0, 3.0), (60.0, 8.0), (55.0, 44.0), (2.0, 40.0)]),
            &frame_corners(80, 60),
        );
        let options = TransformOptions {
            fill: [0, 0, 0, 0],
            ..Default::default()
        };

        let out = transform(&src, &pairs, 80, 60, &options).unwrap();

        let mut inside = 0;
        for px in out.as_bytes().chunks_exact(4) {
            if px == color {
                inside += 1;
            } else {
                assert_eq!(px, [0, 0, 0, 0]);
            }
        }
        assert!(inside > 0);
    }

    #[test]
    fn test_out_of_frame_uses_fill() {
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        // Identity map: only the top-left 4x4 of the output has a source
        let pairs = pair_points(
            &quad([(0.0, 0.0), (3.0, 0.0), (3.0, 3.0), (0.0, 3.0)]),
            &quad([(0.0, 0.0), (3.0, 0.0), (3.0, 3.0), (0.0, 3.0)]),
        );
        let options = TransformOptions {
            fill: [0, 0, 255, 0],
            ..Default::default()
        };

        let out = transform(&src, &pairs, 8, 8, &options).unwrap();

        assert_eq!(out.pixel(0, 0), Some(&RED[..]));
        assert_eq!(out.pixel(3, 3), Some(&RED[..]));
        assert_eq!(out.pixel(5, 0), Some(&[0u8, 0, 255][..]));
        assert_eq!(out.pixel(7, 7), Some(&[0u8, 0, 255][..]));
    }

    #[test]
    fn test_source_edges_snap_into_frame() {
        // Picked on the far pixel boundary: the last output row and column
        // map back onto x == 4 and y == 4
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        let pairs = pair_points(
            &quad([(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]),
            &frame_corners(4, 4),
        );
        let options = TransformOptions {
            fill: [0, 0, 255, 0],
            ..Default::default()
        };

        let out = transform(&src, &pairs, 4, 4, &options).unwrap();
        assert_eq!(out, Raster::filled(4, 4, 3, &RED).unwrap());
    }

    #[test]
    fn test_snap_into() {
        assert_eq!(snap_into(-1e-9, 4.0), Some(0.0));
        assert_eq!(snap_into(4.0 + 1e-9, 4.0), Some(3.0));
        assert_eq!(snap_into(3.5, 4.0), Some(3.5));
        assert_eq!(snap_into(4.01, 4.0), None);
        assert_eq!(snap_into(-0.01, 4.0), None);
        assert_eq!(snap_into(f64::NAN, 4.0), None);
    }

    #[test]
    fn test_horizontal_flip() {
        let src = Raster::new(3, 1, 1, vec![10, 20, 30]).unwrap();
        let pairs = pair_points(
            &quad([(0.0, 0.0), (2.0, 0.0), (2.0, 1.0), (0.0, 1.0)]),
            &quad([(2.0, 0.0), (0.0, 0.0), (0.0, 1.0), (2.0, 1.0)]),
        );

        let out = transform(&src, &pairs, 3, 1, &TransformOptions::default()).unwrap();
        assert_eq!(out.as_bytes(), &[30, 20, 10]);
    }

    #[test]
    fn test_points_map_onto_destinations() {
        let src = quad([(12.0, 20.0), (610.0, 45.0), (590.0, 430.0), (30.0, 470.0)]);
        let dst = frame_corners(640, 480);
        let t = PerspectiveTransform::compute(&pair_points(&src, &dst), &Tolerances::default())
            .unwrap();

        for (s, d) in src.iter().zip(&dst) {
            let (x, y) = t.transform_point(s.x, s.y).unwrap();
            assert!((x - d.x).abs() < 1e-6 && (y - d.y).abs() < 1e-6);
            let (bx, by) = t.inverse_transform_point(d.x, d.y).unwrap();
            assert!((bx - s.x).abs() < 1e-6 && (by - s.y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_rejects_collinear_before_solving() {
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        let pairs = pair_points(
            &quad([(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]),
            &frame_corners(4, 4),
        );
        let result = transform(&src, &pairs, 4, 4, &TransformOptions::default());
        assert!(matches!(result, Err(TransformError::DegenerateInput(_))));
    }

    #[test]
    fn test_rejects_empty_output() {
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        let pairs = pair_points(&frame_corners(4, 4), &frame_corners(4, 4));
        let result = transform(&src, &pairs, 0, 4, &TransformOptions::default());
        assert!(matches!(result, Err(TransformError::InvalidDimensions(_))));
    }

    #[test]
    fn test_rejects_three_points() {
        let src = Raster::filled(4, 4, 3, &RED).unwrap();
        let corners = frame_corners(4, 4);
        let pairs = pair_points(&corners[..3], &corners[..3]);
        let result = transform(&src, &pairs, 4, 4, &TransformOptions::default());
        assert!(matches!(result, Err(TransformError::InvalidCount(3))));
    }
}

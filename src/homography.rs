//! Planar homography estimation
//!
//! Solves the 3x3 projective transform that maps four source points onto
//! four destination points. With h33 fixed to 1 each correspondence gives
//! two linear equations in the remaining eight unknowns:
//!
//! ```text
//! x' * (h31*x + h32*y + 1) = h11*x + h12*y + h13
//! y' * (h31*x + h32*y + 1) = h21*x + h22*y + h23
//! ```
//!
//! Four correspondences stack into an 8x8 system solved by Gaussian
//! elimination with partial pivoting.

use crate::error::TransformError;
use crate::geometry::Correspondence;

/// Below this |w| a mapped point is treated as lying at infinity
const W_EPSILON: f64 = 1e-12;

/// 3x3 homography stored in row-major order, normalized so h33 = 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomographyMatrix {
    m: [f64; 9],
}

impl HomographyMatrix {
    pub const IDENTITY: HomographyMatrix = HomographyMatrix {
        m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
    };

    /// Wrap raw row-major values, rescaling so the bottom-right entry is 1
    /// when it is usable as a scale.
    pub fn from_row_major(m: [f64; 9]) -> Self {
        Self { m }.normalized()
    }

    pub fn as_array(&self) -> &[f64; 9] {
        &self.m
    }

    /// Solve the homography for four validated correspondences
    pub fn from_correspondences(
        correspondences: &[Correspondence; 4],
        pivot_tolerance: f64,
    ) -> Result<Self, TransformError> {
        let mut a = [[0.0f64; 8]; 8];
        let mut b = [0.0f64; 8];

        for (i, c) in correspondences.iter().enumerate() {
            let (x, y) = (c.src.x, c.src.y);
            let (xp, yp) = (c.dst.x, c.dst.y);

            a[i * 2] = [x, y, 1.0, 0.0, 0.0, 0.0, -xp * x, -xp * y];
            b[i * 2] = xp;

            a[i * 2 + 1] = [0.0, 0.0, 0.0, x, y, 1.0, -yp * x, -yp * y];
            b[i * 2 + 1] = yp;
        }

        let h = solve_linear_system(&mut a, &mut b, pivot_tolerance)?;

        Ok(Self {
            m: [h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0],
        })
    }

    #[rustfmt::skip]
    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0] * (m[4] * m[8] - m[5] * m[7]) -
        m[1] * (m[3] * m[8] - m[5] * m[6]) +
        m[2] * (m[3] * m[7] - m[4] * m[6])
    }

    /// Invert through the adjugate
    pub fn inverse(&self, tolerance: f64) -> Result<Self, TransformError> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < tolerance {
            return Err(TransformError::SingularMatrix(det));
        }

        let inv_det = 1.0 / det;
        let inv = adjugate(&self.m).map(|v| v * inv_det);

        Ok(Self { m: inv }.normalized())
    }

    /// Map a point through the homography.
    ///
    /// Returns `None` when the point maps to infinity.
    #[inline]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let m = &self.m;
        let w = m[6] * x + m[7] * y + m[8];
        if w.abs() < W_EPSILON {
            return None;
        }
        let xp = (m[0] * x + m[1] * y + m[2]) / w;
        let yp = (m[3] * x + m[4] * y + m[5]) / w;
        Some((xp, yp))
    }

    fn normalized(self) -> Self {
        let scale = self.m[8];
        if scale.abs() < W_EPSILON || !scale.is_finite() {
            return self;
        }
        Self {
            m: self.m.map(|v| v / scale),
        }
    }
}

#[rustfmt::skip]
fn adjugate(m: &[f64; 9]) -> [f64; 9] {
    [
        m[4] * m[8] - m[5] * m[7],  // [0, 0]
        m[2] * m[7] - m[1] * m[8],  // [0, 1]
        m[1] * m[5] - m[2] * m[4],  // [0, 2]
        m[5] * m[6] - m[3] * m[8],  // [1, 0]
        m[0] * m[8] - m[2] * m[6],  // [1, 1]
        m[2] * m[3] - m[0] * m[5],  // [1, 2]
        m[3] * m[7] - m[4] * m[6],  // [2, 0]
        m[1] * m[6] - m[0] * m[7],  // [2, 1]
        m[0] * m[4] - m[1] * m[3],  // [2, 2]
    ]
}

/// Solve an 8x8 linear system using Gaussian elimination with partial pivoting
fn solve_linear_system(
    a: &mut [[f64; 8]; 8],
    b: &mut [f64; 8],
    pivot_tolerance: f64,
) -> Result<[f64; 8], TransformError> {
    let n = 8;

    // Forward elimination with partial pivoting
    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            if a[row][col].abs() > max_val {
                max_val = a[row][col].abs();
                max_row = row;
            }
        }

        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        if !pivot.is_finite() || pivot.abs() < pivot_tolerance {
            return Err(TransformError::SingularSystem { column: col, pivot });
        }

        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            for j in col..n {
                a[row][j] -= factor * a[col][j];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0f64; 8];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= a[i][j] * x[j];
        }
        x[i] = sum / a[i][i];
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{pair_points, Point2D};
    use approx::assert_abs_diff_eq;

    const TOL: f64 = 1e-10;

    fn quad(points: [(f64, f64); 4]) -> [Point2D; 4] {
        points.map(|(x, y)| Point2D::new(x, y))
    }

    fn correspondences(src: [Point2D; 4], dst: [Point2D; 4]) -> [Correspondence; 4] {
        let pairs = pair_points(&src, &dst);
        [pairs[0], pairs[1], pairs[2], pairs[3]]
    }

    fn assert_matrix_eq(a: &HomographyMatrix, b: &HomographyMatrix, eps: f64) {
        for (x, y) in a.as_array().iter().zip(b.as_array()) {
            assert_abs_diff_eq!(*x, *y, epsilon = eps);
        }
    }

    #[test]
    fn test_identity_correspondences() {
        let pts = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let h = HomographyMatrix::from_correspondences(&correspondences(pts, pts), TOL).unwrap();
        assert_matrix_eq(&h, &HomographyMatrix::IDENTITY, 1e-9);
    }

    #[test]
    fn test_maps_sources_onto_destinations() {
        let src = quad([(12.0, 20.0), (610.0, 45.0), (590.0, 430.0), (30.0, 470.0)]);
        let dst = quad([(0.0, 0.0), (639.0, 0.0), (639.0, 479.0), (0.0, 479.0)]);
        let h = HomographyMatrix::from_correspondences(&correspondences(src, dst), TOL).unwrap();

        for (s, d) in src.iter().zip(&dst) {
            let (x, y) = h.apply(s.x, s.y).unwrap();
            assert_abs_diff_eq!(x, d.x, epsilon = 1e-6);
            assert_abs_diff_eq!(y, d.y, epsilon = 1e-6);
        }
        assert_eq!(h.as_array()[8], 1.0);
    }

    #[test]
    fn test_scaling_square() {
        let src = quad([(0.0, 0.0), (3.0, 0.0), (3.0, 3.0), (0.0, 3.0)]);
        let dst = quad([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let h = HomographyMatrix::from_correspondences(&correspondences(src, dst), TOL).unwrap();
        let expected =
            HomographyMatrix::from_row_major([1.0 / 3.0, 0.0, 0.0, 0.0, 1.0 / 3.0, 0.0, 0.0, 0.0, 1.0]);
        assert_matrix_eq(&h, &expected, 1e-10);
    }

    #[test]
    fn test_collinear_system_is_singular() {
        // Skips validation on purpose: elimination must catch it on its own.
        let src = quad([(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        let dst = quad([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]);
        let result = HomographyMatrix::from_correspondences(&correspondences(src, dst), TOL);
        assert!(matches!(result, Err(TransformError::SingularSystem { .. })));
    }

    #[test]
    fn test_double_inverse_round_trip() {
        let src = quad([(10.0, 10.0), (90.0, 5.0), (95.0, 80.0), (3.0, 97.0)]);
        let dst = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let h = HomographyMatrix::from_correspondences(&correspondences(src, dst), TOL).unwrap();

        let back = h.inverse(TOL).unwrap().inverse(TOL).unwrap();
        assert_matrix_eq(&h, &back, 1e-9);
    }

    #[test]
    fn test_inverse_maps_back() {
        let src = quad([(10.0, 10.0), (90.0, 5.0), (95.0, 80.0), (3.0, 97.0)]);
        let dst = quad([(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)]);
        let h = HomographyMatrix::from_correspondences(&correspondences(src, dst), TOL).unwrap();
        let inv = h.inverse(TOL).unwrap();

        for (s, d) in src.iter().zip(&dst) {
            let (x, y) = inv.apply(d.x, d.y).unwrap();
            assert_abs_diff_eq!(x, s.x, epsilon = 1e-6);
            assert_abs_diff_eq!(y, s.y, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_singular_matrix_inverse() {
        let m = HomographyMatrix::from_row_major([1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0]);
        assert!(matches!(m.inverse(TOL), Err(TransformError::SingularMatrix(_))));
    }

    #[test]
    fn test_translation_inverse() {
        let m = HomographyMatrix::from_row_major([1.0, 0.0, -1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0]);
        let expected =
            HomographyMatrix::from_row_major([1.0, 0.0, 1.0, 0.0, 1.0, -1.0, 0.0, 0.0, 1.0]);
        assert_eq!(m.inverse(TOL).unwrap(), expected);
    }

    #[test]
    fn test_apply_at_infinity() {
        let m = HomographyMatrix::from_row_major([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
        assert!(m.apply(-1.0, 5.0).is_none());
    }
}

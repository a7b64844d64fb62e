//! Points, correspondences and the validation that guards the solver

use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// A point in image pixel space
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    fn sub(&self, other: &Point2D) -> (f64, f64) {
        (self.x - other.x, self.y - other.y)
    }
}

impl From<[f64; 2]> for Point2D {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

/// A source point paired with where it must land in the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub src: Point2D,
    pub dst: Point2D,
}

impl Correspondence {
    pub fn new(src: Point2D, dst: Point2D) -> Self {
        Self { src, dst }
    }
}

/// Pair up source and destination points in order.
///
/// Extra points on either side are dropped, so callers must check the counts
/// themselves if they care (the validator will then see the shorter list).
pub fn pair_points(src: &[Point2D], dst: &[Point2D]) -> Vec<Correspondence> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| Correspondence::new(s, d))
        .collect()
}

/// Check that exactly four correspondences were given and that neither the
/// source nor the destination quadrilateral is degenerate.
///
/// `tolerance` bounds the sine of the angle between two edges sharing a
/// vertex; anything flatter counts as collinear.
pub fn validate_correspondences(
    correspondences: &[Correspondence],
    tolerance: f64,
) -> Result<[Correspondence; 4], TransformError> {
    let quad: [Correspondence; 4] = correspondences
        .try_into()
        .map_err(|_| TransformError::InvalidCount(correspondences.len()))?;

    let src = quad.map(|c| c.src);
    let dst = quad.map(|c| c.dst);
    check_quad(&src, tolerance)
        .map_err(|e| TransformError::DegenerateInput(format!("source {}", e)))?;
    check_quad(&dst, tolerance)
        .map_err(|e| TransformError::DegenerateInput(format!("destination {}", e)))?;

    Ok(quad)
}

fn check_quad(points: &[Point2D; 4], tolerance: f64) -> Result<(), String> {
    if let Some(i) = points.iter().position(|p| !p.is_finite()) {
        return Err(format!("point {} is not finite", i));
    }

    for i in 0..4 {
        for j in (i + 1)..4 {
            if points[i] == points[j] {
                return Err(format!("points {} and {} coincide", i, j));
            }
        }
    }

    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    for (i, j, k) in TRIPLES {
        if is_flat(&points[i], &points[j], &points[k], tolerance) {
            return Err(format!("points {}, {} and {} are collinear", i, j, k));
        }
    }

    Ok(())
}

/// Sine of the angle at `a` between `ab` and `ac` is within tolerance
#[inline]
fn is_flat(a: &Point2D, b: &Point2D, c: &Point2D, tolerance: f64) -> bool {
    let (abx, aby) = b.sub(a);
    let (acx, acy) = c.sub(a);
    let cross = abx * acy - aby * acx;
    let scale = abx.hypot(aby) * acx.hypot(acy);
    cross.abs() <= tolerance * scale
}

/// Reorder four picked points into top-left, top-right, bottom-right,
/// bottom-left.
///
/// Top-left has the smallest x + y and bottom-right the largest; top-right
/// has the smallest y - x and bottom-left the largest. For strongly rotated
/// picks two roles can land on the same point, which validation then rejects.
pub fn order_corners(points: [Point2D; 4]) -> [Point2D; 4] {
    let pick = |key: fn(&Point2D) -> f64, largest: bool| {
        let mut best = points[0];
        for p in &points[1..] {
            let better = if largest { key(p) > key(&best) } else { key(p) < key(&best) };
            if better {
                best = *p;
            }
        }
        best
    };

    let sum = |p: &Point2D| p.x + p.y;
    let diff = |p: &Point2D| p.y - p.x;

    [
        pick(sum, false),
        pick(diff, false),
        pick(sum, true),
        pick(diff, true),
    ]
}

/// Corners of a full `width` x `height` frame, clockwise from top-left
pub fn frame_corners(width: u32, height: u32) -> [Point2D; 4] {
    let right = width.saturating_sub(1) as f64;
    let bottom = height.saturating_sub(1) as f64;
    [
        Point2D::new(0.0, 0.0),
        Point2D::new(right, 0.0),
        Point2D::new(right, bottom),
        Point2D::new(0.0, bottom),
    ]
}

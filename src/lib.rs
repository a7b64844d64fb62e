//! Four-point perspective correction
//!
//! Solves the planar homography that maps four picked points onto a
//! destination quadrilateral and resamples the image through its inverse.
//! The engine lives in [`transform`]; [`server`] exposes it over HTTP.

pub mod codec;
pub mod config;
pub mod error;
pub mod geometry;
pub mod homography;
pub mod raster;
pub mod server;
pub mod session;
pub mod transform;

pub use error::TransformError;
pub use geometry::{Correspondence, Point2D};
pub use homography::HomographyMatrix;
pub use raster::Raster;
pub use transform::{transform, PerspectiveTransform, Tolerances, TransformOptions};

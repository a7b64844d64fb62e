//! Point collection for the interactive picker
//!
//! The picker shows the uploaded image scaled down to fit a canvas and
//! collects four clicks. A session tracks that flow explicitly:
//!
//! ```text
//! Idle --load_image--> CollectingPoints(0) --click x4--> ReadyToTransform
//!                       ^                                      |
//!                       +---------------reset------------------+
//! ```
//!
//! Clicks arrive in canvas coordinates and are stored in image pixel
//! coordinates, so the transform never sees the display scale.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Point2D;
use crate::raster::Raster;

/// Largest area the image is displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasBounds {
    pub max_width: u32,
    pub max_height: u32,
}

/// Scale that fits an image inside the canvas bounds without upscaling
pub fn fit_scale(width: u32, height: u32, bounds: CanvasBounds) -> f64 {
    let sx = bounds.max_width as f64 / width as f64;
    let sy = bounds.max_height as f64 / height as f64;
    sx.min(sy).min(1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// No image loaded
    Idle,
    /// Image loaded, fewer than four points picked (image coordinates)
    CollectingPoints(Vec<Point2D>),
    /// All four points picked
    ReadyToTransform([Point2D; 4]),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::CollectingPoints(_) => "collecting",
            SessionState::ReadyToTransform(_) => "ready",
        }
    }

    pub fn points(&self) -> &[Point2D] {
        match self {
            SessionState::Idle => &[],
            SessionState::CollectingPoints(points) => points,
            SessionState::ReadyToTransform(points) => points,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("no image loaded")]
    NoImage,

    #[error("all 4 points are already selected")]
    AlreadyComplete,

    #[error("click ({x}, {y}) is outside the {width}x{height} canvas")]
    OutsideCanvas { x: f64, y: f64, width: f64, height: f64 },

    #[error("only {0} of 4 points selected")]
    NotReady(usize),
}

/// One user's picker state
#[derive(Debug, Clone)]
pub struct PointSession {
    bounds: CanvasBounds,
    image: Option<Raster>,
    scale: f64,
    state: SessionState,
}

impl PointSession {
    pub fn new(bounds: CanvasBounds) -> Self {
        Self {
            bounds,
            image: None,
            scale: 1.0,
            state: SessionState::Idle,
        }
    }

    /// Show a new image; any picked points are discarded
    pub fn load_image(&mut self, image: Raster) {
        self.scale = fit_scale(image.width(), image.height(), self.bounds);
        self.image = Some(image);
        self.state = SessionState::CollectingPoints(Vec::with_capacity(4));
    }

    /// Record a click given in canvas coordinates.
    ///
    /// Clicks on the canvas's right or bottom border are pulled onto the
    /// last pixel row or column of the image.
    pub fn click(&mut self, x: f64, y: f64) -> Result<&SessionState, SessionError> {
        let (width, height) = self.canvas_size().ok_or(SessionError::NoImage)?;
        let (last_x, last_y) = self.image.as_ref().map_or((0.0, 0.0), |img| {
            (
                img.width().saturating_sub(1) as f64,
                img.height().saturating_sub(1) as f64,
            )
        });

        let points = match &mut self.state {
            SessionState::Idle => return Err(SessionError::NoImage),
            SessionState::ReadyToTransform(_) => return Err(SessionError::AlreadyComplete),
            SessionState::CollectingPoints(points) => points,
        };

        // NaN fails both comparisons and is rejected here too
        if !(x >= 0.0 && x <= width && y >= 0.0 && y <= height) {
            return Err(SessionError::OutsideCanvas { x, y, width, height });
        }

        points.push(Point2D::new(
            (x / self.scale).min(last_x),
            (y / self.scale).min(last_y),
        ));

        if let [a, b, c, d] = points[..] {
            self.state = SessionState::ReadyToTransform([a, b, c, d]);
        }

        Ok(&self.state)
    }

    /// Drop picked points, keep the image
    pub fn reset(&mut self) {
        self.state = match self.image {
            Some(_) => SessionState::CollectingPoints(Vec::with_capacity(4)),
            None => SessionState::Idle,
        };
    }

    /// Drop the image and any points
    pub fn clear(&mut self) {
        self.image = None;
        self.scale = 1.0;
        self.state = SessionState::Idle;
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn image(&self) -> Option<&Raster> {
        self.image.as_ref()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Displayed image size, if an image is loaded
    pub fn canvas_size(&self) -> Option<(f64, f64)> {
        self.image
            .as_ref()
            .map(|img| (img.width() as f64 * self.scale, img.height() as f64 * self.scale))
    }

    /// The four picked points in image coordinates
    pub fn source_points(&self) -> Result<[Point2D; 4], SessionError> {
        match &self.state {
            SessionState::ReadyToTransform(points) => Ok(*points),
            SessionState::CollectingPoints(points) => Err(SessionError::NotReady(points.len())),
            SessionState::Idle => Err(SessionError::NoImage),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (canvas_width, canvas_height) = self.canvas_size().unwrap_or((0.0, 0.0));
        SessionSnapshot {
            state: self.state.name().to_string(),
            points: self.state.points().to_vec(),
            image_width: self.image.as_ref().map_or(0, |img| img.width()),
            image_height: self.image.as_ref().map_or(0, |img| img.height()),
            canvas_width,
            canvas_height,
            scale: self.scale,
        }
    }
}

/// Serializable view of a session for the API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub state: String,
    /// Picked points in image coordinates
    pub points: Vec<Point2D>,
    pub image_width: u32,
    pub image_height: u32,
    pub canvas_width: f64,
    pub canvas_height: f64,
    pub scale: f64,
}

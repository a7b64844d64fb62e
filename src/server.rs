//! HTTP API for the perspective transform
//!
//! `POST /transform` is the stateless endpoint the browser picker talks to.
//! The `/api/sessions` routes keep the picker's point collection on the
//! server: upload once, send clicks in canvas coordinates, then transform.

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Config;
use crate::error::TransformError;
use crate::geometry::{frame_corners, order_corners, pair_points, Point2D};
use crate::raster::Raster;
use crate::session::{PointSession, SessionError, SessionSnapshot};
use crate::transform::transform;

/// Shared application state
pub struct AppState {
    config: Config,
    /// Open point-collection sessions by id
    sessions: RwLock<HashMap<u64, SessionSlot>>,
    next_session_id: AtomicU64,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.server.request_timeout_ms)
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.server.session_ttl_secs)
    }

    /// Run CPU-bound work on the blocking pool under the request timeout.
    ///
    /// On timeout the task is abandoned; it only owns its own buffers.
    async fn run_blocking<T, F>(&self, job: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeout();
        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(job)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ApiError::Internal(e.to_string())),
            Err(_) => Err(ApiError::Timeout(timeout.as_millis() as u64)),
        }
    }
}

/// An open session and the last time a request used it
struct SessionSlot {
    session: PointSession,
    touched: Instant,
}

impl SessionSlot {
    fn new(session: PointSession) -> Self {
        Self {
            session,
            touched: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.touched.elapsed() >= ttl
    }
}

/// Look up a live session and mark it used; an expired one is dropped
fn touch_session(
    sessions: &mut HashMap<u64, SessionSlot>,
    id: u64,
    ttl: Duration,
) -> Result<&mut PointSession, ApiError> {
    if sessions.get(&id).is_some_and(|slot| slot.is_expired(ttl)) {
        sessions.remove(&id);
        info!("Session {} expired", id);
    }
    let slot = sessions.get_mut(&id).ok_or(ApiError::SessionNotFound(id))?;
    slot.touched = Instant::now();
    Ok(&mut slot.session)
}

/// Failure of an API call, rendered as `{"error", "code"}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("output of {pixels} pixels exceeds the limit of {limit}")]
    OutputTooLarge { pixels: u64, limit: u64 },

    #[error("session {0} not found")]
    SessionNotFound(u64),

    #[error("too many open sessions (limit {0})")]
    TooManySessions(usize),

    #[error("transform did not finish within {0} ms")]
    Timeout(u64),

    #[error("transform task failed: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Transform(e) => e.code(),
            ApiError::Session(_) => "session_state",
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::OutputTooLarge { .. } => "output_too_large",
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::TooManySessions(_) => "too_many_sessions",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Transform(e) => match e {
                TransformError::InvalidCount(_)
                | TransformError::InvalidDimensions(_)
                | TransformError::Decode(_) => StatusCode::BAD_REQUEST,
                TransformError::DegenerateInput(_)
                | TransformError::SingularSystem { .. }
                | TransformError::SingularMatrix(_) => StatusCode::UNPROCESSABLE_ENTITY,
                TransformError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Session(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) | ApiError::OutputTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TooManySessions(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        } else {
            debug!("Request rejected ({}): {}", self.code(), self);
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the router; split from [`run_server`] so tests can drive it
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/transform", post(transform_image))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/points", post(add_point))
        .route("/api/sessions/:id/reset", post(reset_session))
        .route("/api/sessions/:id/transform", post(transform_session))
        .route("/api/info", get(get_info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// A point given either as `[x, y]` or `{"x": .., "y": ..}`
#[derive(Deserialize)]
#[serde(untagged)]
enum PointInput {
    Pair([f64; 2]),
    Object(Point2D),
}

impl From<PointInput> for Point2D {
    fn from(p: PointInput) -> Self {
        match p {
            PointInput::Pair(pair) => pair.into(),
            PointInput::Object(point) => point,
        }
    }
}

fn parse_points(field: &str, text: &str) -> Result<Vec<Point2D>, ApiError> {
    let points: Vec<PointInput> = serde_json::from_str(text).map_err(|e| {
        ApiError::BadRequest(format!("field '{}' is not a point list: {}", field, e))
    })?;
    Ok(points.into_iter().map(Point2D::from).collect())
}

fn parse_dimension(field: &str, text: &str) -> Result<u32, ApiError> {
    text.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("field '{}' must be a non-negative integer", field)))
}

fn parse_bool(field: &str, text: &str) -> Result<bool, ApiError> {
    match text.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ApiError::BadRequest(format!("field '{}' must be true or false", field))),
    }
}

fn multipart_error(limit: usize) -> impl Fn(MultipartError) -> ApiError {
    move |e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(limit)
        } else {
            ApiError::BadRequest(e.body_text())
        }
    }
}

/// Fields of a transform upload
#[derive(Default)]
struct TransformForm {
    file: Option<Bytes>,
    points: Option<Vec<Point2D>>,
    destination: Option<Vec<Point2D>>,
    width: Option<u32>,
    height: Option<u32>,
    order: Option<bool>,
}

async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
    limit: usize,
) -> Result<TransformForm, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let to_api = multipart_error(limit);
    let mut form = TransformForm::default();

    while let Some(field) = multipart.next_field().await.map_err(&to_api)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.file = Some(field.bytes().await.map_err(&to_api)?);
            continue;
        }

        let text = field.text().await.map_err(&to_api)?;
        match name.as_str() {
            "points" => form.points = Some(parse_points("points", &text)?),
            "destination" => form.destination = Some(parse_points("destination", &text)?),
            "width" => form.width = Some(parse_dimension("width", &text)?),
            "height" => form.height = Some(parse_dimension("height", &text)?),
            "order" => form.order = Some(parse_bool("order", &text)?),
            other => debug!("Ignoring unknown form field '{}'", other),
        }
    }

    Ok(form)
}

/// Everything a transform needs once the image is decoded
struct RenderJob {
    source: Raster,
    points: Vec<Point2D>,
    destination: Option<Vec<Point2D>>,
    width: Option<u32>,
    height: Option<u32>,
    order: bool,
}

/// Transformed image as returned to the client
#[derive(Debug, Serialize, Deserialize)]
pub struct TransformResponse {
    /// Encoded image bytes, as text per `encoding`
    pub image: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub encoding: String,
}

fn render(job: RenderJob, config: &Config) -> Result<TransformResponse, ApiError> {
    let started = Instant::now();
    let width = job.width.unwrap_or(job.source.width());
    let height = job.height.unwrap_or(job.source.height());

    let pixels = width as u64 * height as u64;
    let limit = config.server.max_output_pixels;
    if pixels > limit {
        return Err(ApiError::OutputTooLarge { pixels, limit });
    }

    let src: Vec<Point2D> = match <[Point2D; 4]>::try_from(job.points.as_slice()) {
        Ok(quad) if job.order => order_corners(quad).to_vec(),
        Ok(quad) => quad.to_vec(),
        Err(_) => return Err(TransformError::InvalidCount(job.points.len()).into()),
    };
    let dst = match job.destination {
        Some(dst) => dst,
        // The frame corners of a single row or column coincide
        None if width < 2 || height < 2 => {
            return Err(TransformError::InvalidDimensions(format!(
                "output size {}x{} is too small for the full-frame destination",
                width, height
            ))
            .into());
        }
        None => frame_corners(width, height).to_vec(),
    };
    if dst.len() != src.len() {
        return Err(TransformError::InvalidCount(dst.len()).into());
    }

    let correspondences = pair_points(&src, &dst);
    let output = transform(
        &job.source,
        &correspondences,
        width,
        height,
        &config.transform.options(),
    )?;

    let bytes = codec::encode(&output, config.output.format, config.output.jpeg_quality)?;
    info!(
        "Transformed {}x{} -> {}x{} in {} ms ({} bytes {})",
        job.source.width(),
        job.source.height(),
        width,
        height,
        started.elapsed().as_millis(),
        bytes.len(),
        config.output.format.as_str()
    );

    Ok(TransformResponse {
        image: config.output.encoding.encode(&bytes),
        width,
        height,
        format: config.output.format.as_str().to_string(),
        encoding: config.output.encoding.as_str().to_string(),
    })
}

/// Stateless transform: multipart `file` + `points`
async fn transform_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<TransformResponse>, ApiError> {
    let form = read_form(multipart, state.config.server.max_upload_bytes).await?;

    let file = form
        .file
        .ok_or_else(|| ApiError::BadRequest("missing form field 'file'".into()))?;
    let points = form
        .points
        .ok_or_else(|| ApiError::BadRequest("missing form field 'points'".into()))?;
    // Reject bad counts before paying for the decode
    if points.len() != 4 {
        return Err(TransformError::InvalidCount(points.len()).into());
    }

    let order = form.order.unwrap_or(state.config.transform.order_points);
    let (destination, width, height) = (form.destination, form.width, form.height);

    let job_state = state.clone();
    let response = state
        .run_blocking(move || {
            let source = codec::decode(&file)?;
            let job = RenderJob {
                source,
                points,
                destination,
                width,
                height,
                order,
            };
            render(job, &job_state.config)
        })
        .await?;

    Ok(Json(response))
}

#[derive(Serialize, Deserialize)]
struct SessionResponse {
    id: u64,
    #[serde(flatten)]
    session: SessionSnapshot,
}

/// Open a session from a multipart `file` upload
async fn create_session(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let form = read_form(multipart, state.config.server.max_upload_bytes).await?;
    let file = form
        .file
        .ok_or_else(|| ApiError::BadRequest("missing form field 'file'".into()))?;

    let image = state.run_blocking(move || Ok(codec::decode(&file)?)).await?;

    let mut session = PointSession::new(state.config.canvas.bounds());
    session.load_image(image);
    let snapshot = session.snapshot();

    let id = {
        let mut sessions = state.sessions.write();
        let ttl = state.session_ttl();
        let before = sessions.len();
        sessions.retain(|_, slot| !slot.is_expired(ttl));
        if sessions.len() < before {
            info!("Dropped {} expired session(s)", before - sessions.len());
        }

        let limit = state.config.server.max_sessions;
        if sessions.len() >= limit {
            return Err(ApiError::TooManySessions(limit));
        }
        let id = state.next_session_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id, SessionSlot::new(session));
        id
    };

    info!(
        "Opened session {} ({}x{}, scale {:.3})",
        id, snapshot.image_width, snapshot.image_height, snapshot.scale
    );

    Ok(Json(SessionResponse {
        id,
        session: snapshot,
    }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<SessionResponse>, ApiError> {
    let mut sessions = state.sessions.write();
    let session = touch_session(&mut sessions, id, state.session_ttl())?;
    Ok(Json(SessionResponse {
        id,
        session: session.snapshot(),
    }))
}

/// A click in canvas coordinates
#[derive(Deserialize)]
struct ClickRequest {
    x: f64,
    y: f64,
}

async fn add_point(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    click: Result<Json<ClickRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(click) = click.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut sessions = state.sessions.write();
    let session = touch_session(&mut sessions, id, state.session_ttl())?;
    let point_count = session.click(click.x, click.y)?.points().len();
    debug!("Session {}: point {} at ({}, {})", id, point_count, click.x, click.y);

    Ok(Json(SessionResponse {
        id,
        session: session.snapshot(),
    }))
}

async fn reset_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<SessionResponse>, ApiError> {
    let mut sessions = state.sessions.write();
    let session = touch_session(&mut sessions, id, state.session_ttl())?;
    session.reset();

    Ok(Json(SessionResponse {
        id,
        session: session.snapshot(),
    }))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    match state.sessions.write().remove(&id) {
        Some(_) => {
            info!("Closed session {}", id);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::SessionNotFound(id)),
    }
}

/// Transform the session image with its four picked points
async fn transform_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<TransformResponse>, ApiError> {
    // Copy out so the lock is not held during the warp
    let (source, points) = {
        let mut sessions = state.sessions.write();
        let session = touch_session(&mut sessions, id, state.session_ttl())?;
        let points = session.source_points()?;
        let source = session.image().cloned().ok_or(SessionError::NoImage)?;
        (source, points)
    };

    let job = RenderJob {
        source,
        points: points.to_vec(),
        destination: None,
        width: None,
        height: None,
        order: state.config.transform.order_points,
    };

    let job_state = state.clone();
    let response = state
        .run_blocking(move || render(job, &job_state.config))
        .await?;

    Ok(Json(response))
}

/// System information response
#[derive(Serialize, Deserialize)]
struct InfoResponse {
    version: String,
    output_format: String,
    encoding: String,
    max_upload_bytes: usize,
    max_output_pixels: u64,
    open_sessions: usize,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let config = &state.config;

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        output_format: config.output.format.as_str().to_string(),
        encoding: config.output.encoding.as_str().to_string(),
        max_upload_bytes: config.server.max_upload_bytes,
        max_output_pixels: config.server.max_output_pixels,
        open_sessions: state
            .sessions
            .read()
            .values()
            .filter(|slot| !slot.is_expired(state.session_ttl()))
            .count(),
    })
}

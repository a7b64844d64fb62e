//! Configuration management for the perspective-warp service

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codec::{OutputFormat, PayloadEncoding};
use crate::session::CanvasBounds;
use crate::transform::{Tolerances, TransformOptions};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body (image upload included)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Time budget for one transform before the request is abandoned
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on output width * height
    #[serde(default = "default_max_output_pixels")]
    pub max_output_pixels: u64,
    /// Upper bound on concurrently open point-collection sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions untouched for this long are dropped
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_output_pixels() -> u64 {
    40_000_000
}

fn default_max_sessions() -> usize {
    64
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: default_max_upload_bytes(),
            request_timeout_ms: default_request_timeout_ms(),
            max_output_pixels: default_max_output_pixels(),
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

/// Homography and warping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Value for output pixels that map outside the source (RGBA; extra
    /// channels are ignored for RGB images)
    #[serde(default)]
    pub fill: [u8; 4],

    /// Reorder picked points into TL, TR, BR, BL before solving
    #[serde(default = "default_true")]
    pub order_points: bool,

    #[serde(default = "default_pivot_tolerance")]
    pub pivot_tolerance: f64,

    #[serde(default = "default_determinant_tolerance")]
    pub determinant_tolerance: f64,

    #[serde(default = "default_collinearity_tolerance")]
    pub collinearity_tolerance: f64,
}

fn default_true() -> bool {
    true
}

fn default_pivot_tolerance() -> f64 {
    Tolerances::default().pivot
}

fn default_determinant_tolerance() -> f64 {
    Tolerances::default().determinant
}

fn default_collinearity_tolerance() -> f64 {
    Tolerances::default().collinearity
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            fill: [0, 0, 0, 0],
            order_points: true,
            pivot_tolerance: default_pivot_tolerance(),
            determinant_tolerance: default_determinant_tolerance(),
            collinearity_tolerance: default_collinearity_tolerance(),
        }
    }
}

impl TransformConfig {
    pub fn options(&self) -> TransformOptions {
        TransformOptions {
            fill: self.fill,
            tolerances: Tolerances {
                pivot: self.pivot_tolerance,
                determinant: self.determinant_tolerance,
                collinearity: self.collinearity_tolerance,
            },
        }
    }
}

/// How transformed images are returned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub encoding: PayloadEncoding,
}

fn default_jpeg_quality() -> u8 {
    95
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            jpeg_quality: default_jpeg_quality(),
            encoding: PayloadEncoding::default(),
        }
    }
}

/// Size of the canvas the point picker displays images on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            max_width: 800,
            max_height: 600,
        }
    }
}

impl CanvasConfig {
    pub fn bounds(&self) -> CanvasBounds {
        CanvasBounds {
            max_width: self.max_width,
            max_height: self.max_height,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub transform: TransformConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub canvas: CanvasConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.output.format, OutputFormat::Jpeg);
        assert_eq!(config.output.jpeg_quality, 95);
        assert_eq!(config.output.encoding, PayloadEncoding::Hex);
        assert!(config.transform.order_points);
        assert_eq!(config.canvas.max_width, 800);
        assert_eq!(config.transform.options().tolerances, Tolerances::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [output]
            format = "png"
            encoding = "base64"

            [transform]
            fill = [255, 255, 255, 255]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.max_sessions, 64);
        assert_eq!(config.server.session_ttl_secs, 1800);
        assert_eq!(config.output.format, OutputFormat::Png);
        assert_eq!(config.output.jpeg_quality, 95);
        assert_eq!(config.output.encoding, PayloadEncoding::Base64);
        assert_eq!(config.transform.options().fill, [255, 255, 255, 255]);
        assert_eq!(config.canvas.max_height, 600);
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_or_create(&path).unwrap();
        assert!(path.exists());

        let loaded = Config::load_or_create(&path).unwrap();
        assert_eq!(loaded.server.port, created.server.port);
        assert_eq!(loaded.transform.fill, created.transform.fill);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "server = 3").unwrap();

        let err = Config::load_or_create(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}

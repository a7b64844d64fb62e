//! perspective-warp - four-point perspective correction service
//!
//! Accepts an image and four picked points, solves the planar homography
//! that maps the picked quadrilateral onto a rectangular frame, and returns
//! the warped image.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use perspective_warp::{config, server};

/// perspective-warp - four-point perspective correction service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Web server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over --verbose when set
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("perspective-warp v{}", env!("CARGO_PKG_VERSION"));

    // Load or create configuration
    let mut config = config::Config::load_or_create(&args.config)?;

    // CLI args override config file values
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(
        "Output: {} ({}), request timeout {} ms, upload limit {} bytes",
        config.output.format.as_str(),
        config.output.encoding.as_str(),
        config.server.request_timeout_ms,
        config.server.max_upload_bytes
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(server::AppState::new(config));

    info!("Starting web server at http://{}", addr);
    server::run_server(&addr, state).await
}

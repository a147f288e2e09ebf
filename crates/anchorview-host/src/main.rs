//! Anchorview - Main entry point
//!
//! Runs a marker-anchored viewing session: replayed detections drive the
//! tracking context, glTF assets are streamed per marker, and a headless
//! renderer draws every frame.

mod config;
mod gltf_loader;
mod headless;
mod presentation;
mod replay;

use anchorview_core::{Collaborators, FrameLoop};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::gltf_loader::GltfLoader;
use crate::headless::HeadlessRenderer;
use crate::replay::{DetectionScript, ReplayCapture, ReplayTracker};

/// Frames between headless renderer statistics logs
const RENDER_LOG_INTERVAL: u64 = 300;

#[derive(Parser, Debug)]
#[command(name = "anchorview")]
#[command(about = "Marker-anchored 3D content viewer")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "anchorview.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Print the session summary as JSON on exit
    #[arg(long)]
    summary: bool,

    /// Write a default configuration file and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Anchorview v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = &args.write_default_config {
        config::save_default_config(path)?;
        info!(path = %path.display(), "Wrote default configuration");
        return Ok(());
    }

    let config = config::load_config(&args.config)?;
    info!(
        markers = config.markers.len(),
        frame_rate = config.session.frame_rate,
        visibility = ?config.session.visibility,
        "Configuration loaded"
    );

    let runtime = Handle::current();
    let (tracker, capture) = replay_sources(&config, &runtime);
    let collaborators = Collaborators {
        renderer: Box::new(HeadlessRenderer::new(RENDER_LOG_INTERVAL)),
        loader: Box::new(GltfLoader::new(config.assets_root(), runtime.clone())),
        tracker: Box::new(tracker),
        capture: Box::new(capture),
    };
    let settings = config.session_settings(config.load_calibration());

    let mut frame_loop = FrameLoop::start(settings, collaborators, config.markers.clone())
        .context("Failed to start session")?;

    let overlay = tokio::spawn(presentation::run_overlay(frame_loop.subscribe()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Unable to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        }
    });

    frame_loop
        .run(config.frame_period(), shutdown_rx, args.frames)
        .await;

    let summary = frame_loop.teardown();
    if let Err(e) = overlay.await {
        warn!(error = %e, "Overlay task failed");
    }

    if args.summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

/// Replay tracker and capture source. An unreadable detection script leaves the
/// capture unavailable instead of aborting.
fn replay_sources(config: &Config, runtime: &Handle) -> (ReplayTracker, ReplayCapture) {
    let path = Path::new(&config.capture.replay);
    match DetectionScript::from_file(path) {
        Ok(script) => {
            info!(
                path = %path.display(),
                detections = script.detections.len(),
                "Loaded detection script"
            );
            let capture = ReplayCapture::new(
                runtime.clone(),
                Duration::from_millis(config.capture.grace_delay_ms),
                config.capture.width,
                config.capture.height,
            );
            (ReplayTracker::new(script), capture)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Detection script unavailable");
            let capture = ReplayCapture::unavailable(
                runtime.clone(),
                format!("cannot read {}: {e}", path.display()),
            );
            (ReplayTracker::new(DetectionScript::default()), capture)
        }
    }
}

//! Configuration loading and defaults

use anchorview_core::{
    CalibrationProfile, CameraSettings, MarkerSpec, Placement, SessionSettings, Viewport,
    VisibilityPolicy,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default = "default_markers", rename = "marker")]
    pub markers: Vec<MarkerSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            camera: CameraSettings::default(),
            capture: CaptureConfig::default(),
            assets: AssetsConfig::default(),
            markers: default_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    /// Target frames per second
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,
    /// Camera calibration profile (TOML)
    #[serde(default = "default_calibration")]
    pub calibration: String,
    #[serde(default)]
    pub visibility: VisibilityPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            frame_rate: default_frame_rate(),
            calibration: default_calibration(),
            visibility: VisibilityPolicy::default(),
        }
    }
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_frame_rate() -> f64 {
    60.0
}

fn default_calibration() -> String {
    "camera_para.toml".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Detection script replayed in place of a live camera
    #[serde(default = "default_replay")]
    pub replay: String,
    /// Delay before the source reports ready, in milliseconds
    #[serde(default = "default_grace_delay")]
    pub grace_delay_ms: u64,
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            replay: default_replay(),
            grace_delay_ms: default_grace_delay(),
            width: default_capture_width(),
            height: default_capture_height(),
        }
    }
}

fn default_replay() -> String {
    "detections.toml".to_string()
}

fn default_grace_delay() -> u64 {
    2000
}

fn default_capture_width() -> u32 {
    640
}

fn default_capture_height() -> u32 {
    480
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Directory marker asset paths are resolved against
    #[serde(default = "default_assets_root")]
    pub root: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            root: default_assets_root(),
        }
    }
}

fn default_assets_root() -> String {
    "./assets".to_string()
}

fn default_markers() -> Vec<MarkerSpec> {
    let placement = |rotation: [f32; 3]| Placement {
        position: [-2.2, 1.0, -1.5],
        rotation,
        scale: [0.25, 0.25, 0.25],
    };
    let upright = placement([-FRAC_PI_2, 0.0, 0.0]);
    let turned = placement([-FRAC_PI_2, -FRAC_PI_2, 0.0]);

    vec![
        MarkerSpec::new("marker.patt", "asset.glb")
            .with_placement(upright)
            .with_caption("This is the description of marker 1."),
        MarkerSpec::new("marker2.patt", "asset2.glb")
            .with_placement(turned)
            .with_caption("This is the description of marker 2."),
        MarkerSpec::new("marker_pen.patt", "asset_pen.glb")
            .with_placement(turned)
            .with_caption("This is the description of the pen marker."),
        MarkerSpec::new("marker_apple.patt", "asset_apple.glb")
            .with_placement(turned)
            .with_caption("This is the description of the apple marker."),
        MarkerSpec::new("marker_applePen.patt", "asset_applePen.glb")
            .with_placement(turned)
            .with_caption("This is the description of the apple pen marker."),
    ]
}

impl Config {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.session.viewport_width, self.session.viewport_height)
    }

    /// Tick period for the configured frame rate (60 Hz if the rate is unusable)
    pub fn frame_period(&self) -> Duration {
        let rate = self.session.frame_rate;
        match Duration::try_from_secs_f64(1.0 / rate) {
            Ok(period) if rate > 0.0 && !period.is_zero() => period,
            _ => {
                warn!(frame_rate = rate, "Invalid frame rate, using 60 Hz");
                Duration::from_secs_f64(1.0 / default_frame_rate())
            }
        }
    }

    pub fn assets_root(&self) -> PathBuf {
        PathBuf::from(&self.assets.root)
    }

    /// Load the calibration profile. A missing or invalid profile disables
    /// tracking for the session instead of aborting startup.
    pub fn load_calibration(&self) -> Option<CalibrationProfile> {
        let path = Path::new(&self.session.calibration);
        match CalibrationProfile::from_file(path) {
            Ok(profile) => {
                info!(path = %path.display(), fx = profile.fx, fy = profile.fy, "Loaded calibration");
                Some(profile)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Calibration unavailable");
                None
            }
        }
    }

    pub fn session_settings(&self, calibration: Option<CalibrationProfile>) -> SessionSettings {
        SessionSettings {
            viewport: self.viewport(),
            calibration,
            camera: self.camera,
            visibility: self.session.visibility,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), markers = config.markers.len(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

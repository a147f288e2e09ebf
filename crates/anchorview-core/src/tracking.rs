//! Tracking context and capture source boundaries
//!
//! Marker detection and pose estimation are external. The frame loop only needs a
//! context that can be initialised from a calibration profile, accepts marker
//! registrations, and reports poses plus found/lost transitions for each frame.

use glam::{Mat4, Vec4};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::marker::PatternId;
use crate::scene::NodeId;

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Failed to read calibration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse calibration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),
    #[error("Pattern already registered: {0}")]
    DuplicatePattern(PatternId),
    #[error("Tracking context is not initialized")]
    NotInitialized,
    #[error("Frame {sequence} could not be processed: {reason}")]
    Update { sequence: u64, reason: String },
}

/// Pinhole calibration of the capture camera
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Calibrated image width in pixels
    pub width: u32,
    /// Calibrated image height in pixels
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default = "default_near")]
    pub near: f64,
    #[serde(default = "default_far")]
    pub far: f64,
}

fn default_near() -> f64 {
    0.01
}

fn default_far() -> f64 {
    20.0
}

impl CalibrationProfile {
    pub fn from_file(path: &Path) -> Result<Self, TrackingError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TrackingError> {
        let profile: CalibrationProfile = toml::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), TrackingError> {
        if self.width == 0 || self.height == 0 {
            return Err(TrackingError::InvalidCalibration(
                "image size must be non-zero".to_string(),
            ));
        }
        let finite = [self.fx, self.fy, self.cx, self.cy, self.near, self.far]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.fx.abs() < 1e-12 || self.fy.abs() < 1e-12 {
            return Err(TrackingError::InvalidCalibration(
                "focal lengths must be finite and non-zero".to_string(),
            ));
        }
        if !(self.near > 0.0 && self.far > self.near) {
            return Err(TrackingError::InvalidCalibration(format!(
                "clip range {}..{} is invalid",
                self.near, self.far
            )));
        }
        Ok(())
    }

    /// OpenGL-style projection for a camera looking down -Z, image origin top-left
    pub fn projection_matrix(&self) -> Mat4 {
        let w = self.width as f64;
        let h = self.height as f64;
        let (n, f) = (self.near, self.far);
        Mat4::from_cols(
            Vec4::new((2.0 * self.fx / w) as f32, 0.0, 0.0, 0.0),
            Vec4::new(0.0, (2.0 * self.fy / h) as f32, 0.0, 0.0),
            Vec4::new(
                (1.0 - 2.0 * self.cx / w) as f32,
                (2.0 * self.cy / h - 1.0) as f32,
                (-(f + n) / (f - n)) as f32,
                -1.0,
            ),
            Vec4::new(0.0, 0.0, (-2.0 * f * n / (f - n)) as f32, 0.0),
        )
    }
}

/// Handle returned by the tracking context for a registered marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarkerHandle(pub u32);

/// One captured video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Monotonic capture counter, starting at 1
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

/// Receiver of per-frame tracking results
pub trait TrackingSink {
    /// Latest pose of a detected marker, relative to the camera
    fn pose(&mut self, marker: MarkerHandle, pose: Mat4);
    /// The marker became detected
    fn found(&mut self, marker: MarkerHandle);
    /// The marker stopped being detected
    fn lost(&mut self, marker: MarkerHandle);
}

/// External marker tracking context
pub trait TrackingContext {
    /// Load the calibration and return the camera projection matrix
    fn initialize(&mut self, calibration: &CalibrationProfile) -> Result<Mat4, TrackingError>;

    /// Start tracking `pattern`, posing `anchor` whenever it is detected
    fn register_marker(
        &mut self,
        anchor: NodeId,
        pattern: &PatternId,
    ) -> Result<MarkerHandle, TrackingError>;

    /// Process one frame, reporting poses and transitions to `sink`
    fn update(&mut self, frame: &VideoFrame, sink: &mut dyn TrackingSink)
        -> Result<(), TrackingError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Starting,
    Ready,
    /// The source will never produce frames (e.g., camera permission denied)
    Unavailable(String),
}

/// External camera capture source
pub trait CaptureSource {
    /// Begin acquisition. Must not block; readiness is reported by `status`.
    fn start(&mut self);

    fn status(&self) -> CaptureStatus;

    /// Grab the current frame, if one is available
    fn frame(&mut self) -> Option<VideoFrame>;
}

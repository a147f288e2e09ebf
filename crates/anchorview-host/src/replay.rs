//! Replay-driven tracking context and capture source
//!
//! Stand-ins for the computer-vision tracker and the camera: a detection script
//! says which pattern is visible over which frame range and at which pose.

use anchorview_core::{
    CalibrationProfile, CaptureSource, CaptureStatus, MarkerHandle, NodeId, PatternId,
    TrackingContext, TrackingError, TrackingSink, VideoFrame,
};
use glam::{EulerRot, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// One pattern detected over a range of capture frames
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub pattern: PatternId,
    /// First frame (capture sequence number) the pattern is visible in
    pub from_frame: u64,
    /// First frame it is no longer visible in
    pub to_frame: u64,
    #[serde(default)]
    pub position: [f32; 3],
    /// XYZ Euler angles in radians
    #[serde(default)]
    pub rotation: [f32; 3],
}

impl Detection {
    fn covers(&self, sequence: u64) -> bool {
        (self.from_frame..self.to_frame).contains(&sequence)
    }

    fn pose(&self) -> Mat4 {
        let [rx, ry, rz] = self.rotation;
        Mat4::from_rotation_translation(
            Quat::from_euler(EulerRot::XYZ, rx, ry, rz),
            Vec3::from(self.position),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionScript {
    #[serde(default, rename = "detection")]
    pub detections: Vec<Detection>,
}

impl DetectionScript {
    pub fn from_file(path: &Path) -> Result<Self, TrackingError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

pub struct ReplayTracker {
    script: DetectionScript,
    initialized: bool,
    /// Registered patterns, indexed by marker handle
    markers: Vec<PatternId>,
    detected: HashSet<MarkerHandle>,
}

impl ReplayTracker {
    pub fn new(script: DetectionScript) -> Self {
        Self {
            script,
            initialized: false,
            markers: Vec::new(),
            detected: HashSet::new(),
        }
    }

    fn detection(&self, pattern: &PatternId, sequence: u64) -> Option<&Detection> {
        self.script
            .detections
            .iter()
            .find(|d| &d.pattern == pattern && d.covers(sequence))
    }
}

impl TrackingContext for ReplayTracker {
    fn initialize(&mut self, calibration: &CalibrationProfile) -> Result<Mat4, TrackingError> {
        calibration.validate()?;
        self.initialized = true;
        info!(
            detections = self.script.detections.len(),
            width = calibration.width,
            height = calibration.height,
            "Replay tracker initialized"
        );
        Ok(calibration.projection_matrix())
    }

    fn register_marker(
        &mut self,
        anchor: NodeId,
        pattern: &PatternId,
    ) -> Result<MarkerHandle, TrackingError> {
        if self.markers.contains(pattern) {
            return Err(TrackingError::DuplicatePattern(pattern.clone()));
        }
        let handle = MarkerHandle(self.markers.len() as u32);
        self.markers.push(pattern.clone());
        debug!(pattern = %pattern, anchor = %anchor, handle = handle.0, "Replay marker registered");
        Ok(handle)
    }

    fn update(
        &mut self,
        frame: &VideoFrame,
        sink: &mut dyn TrackingSink,
    ) -> Result<(), TrackingError> {
        if !self.initialized {
            return Err(TrackingError::NotInitialized);
        }

        for (index, pattern) in self.markers.iter().enumerate() {
            let handle = MarkerHandle(index as u32);
            match self.detection(pattern, frame.sequence) {
                Some(detection) => {
                    sink.pose(handle, detection.pose());
                    if self.detected.insert(handle) {
                        sink.found(handle);
                    }
                }
                None => {
                    if self.detected.remove(&handle) {
                        sink.lost(handle);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Synthetic camera that becomes ready after a grace delay
pub struct ReplayCapture {
    runtime: Handle,
    grace_delay: Duration,
    width: u32,
    height: u32,
    ready: Arc<AtomicBool>,
    unavailable: Option<String>,
    started: bool,
    sequence: u64,
    pixels: Arc<[u8]>,
}

impl ReplayCapture {
    pub fn new(runtime: Handle, grace_delay: Duration, width: u32, height: u32) -> Self {
        let pixels: Arc<[u8]> = vec![0u8; width as usize * height as usize].into();
        Self {
            runtime,
            grace_delay,
            width,
            height,
            ready: Arc::new(AtomicBool::new(false)),
            unavailable: None,
            started: false,
            sequence: 0,
            pixels,
        }
    }

    /// A source that never produces frames
    pub fn unavailable(runtime: Handle, reason: impl Into<String>) -> Self {
        let mut capture = Self::new(runtime, Duration::ZERO, 0, 0);
        capture.unavailable = Some(reason.into());
        capture
    }
}

impl CaptureSource for ReplayCapture {
    fn start(&mut self) {
        if self.started || self.unavailable.is_some() {
            return;
        }
        self.started = true;

        let ready = Arc::clone(&self.ready);
        let delay = self.grace_delay;
        info!(grace_delay_ms = delay.as_millis() as u64, "Capture source starting");
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            ready.store(true, Ordering::Release);
            info!("Capture source ready");
        });
    }

    fn status(&self) -> CaptureStatus {
        if let Some(reason) = &self.unavailable {
            CaptureStatus::Unavailable(reason.clone())
        } else if self.ready.load(Ordering::Acquire) {
            CaptureStatus::Ready
        } else {
            CaptureStatus::Starting
        }
    }

    fn frame(&mut self) -> Option<VideoFrame> {
        if self.status() != CaptureStatus::Ready {
            return None;
        }
        self.sequence += 1;
        Some(VideoFrame {
            sequence: self.sequence,
            width: self.width,
            height: self.height,
            pixels: Arc::clone(&self.pixels),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Events {
        poses: Vec<(MarkerHandle, Mat4)>,
        found: Vec<MarkerHandle>,
        lost: Vec<MarkerHandle>,
    }

    impl TrackingSink for Events {
        fn pose(&mut self, marker: MarkerHandle, pose: Mat4) {
            self.poses.push((marker, pose));
        }

        fn found(&mut self, marker: MarkerHandle) {
            self.found.push(marker);
        }

        fn lost(&mut self, marker: MarkerHandle) {
            self.lost.push(marker);
        }
    }

    fn calibration() -> CalibrationProfile {
        CalibrationProfile::from_toml_str(
            "width = 640\nheight = 480\nfx = 570.0\nfy = 570.0\ncx = 320.0\ncy = 240.0\n",
        )
        .unwrap()
    }

    fn frame(sequence: u64) -> VideoFrame {
        VideoFrame {
            sequence,
            width: 2,
            height: 2,
            pixels: Arc::from(vec![0u8; 4]),
        }
    }

    fn script() -> DetectionScript {
        toml::from_str(
            r#"
[[detection]]
pattern = "marker2.patt"
from_frame = 3
to_frame = 5
position = [0.0, 0.0, -1.5]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_found_and_lost_on_transitions() {
        let mut tracker = ReplayTracker::new(script());
        tracker.initialize(&calibration()).unwrap();
        tracker
            .register_marker(NodeId(1), &PatternId::new("marker.patt"))
            .unwrap();
        let second = tracker
            .register_marker(NodeId(2), &PatternId::new("marker2.patt"))
            .unwrap();

        let mut events = Events::default();
        for sequence in 1..=6 {
            tracker.update(&frame(sequence), &mut events).unwrap();
        }

        assert_eq!(events.found, vec![second]);
        assert_eq!(events.lost, vec![second]);
        assert_eq!(events.poses.len(), 2);
        let expected = Mat4::from_translation(Vec3::new(0.0, 0.0, -1.5));
        assert!(events.poses[0].1.abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn test_update_requires_initialize() {
        let mut tracker = ReplayTracker::new(script());
        let result = tracker.update(&frame(1), &mut Events::default());
        assert!(matches!(result, Err(TrackingError::NotInitialized)));
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let mut tracker = ReplayTracker::new(DetectionScript::default());
        let pattern = PatternId::new("marker.patt");
        tracker.register_marker(NodeId(1), &pattern).unwrap();
        assert!(matches!(
            tracker.register_marker(NodeId(2), &pattern),
            Err(TrackingError::DuplicatePattern(_))
        ));
        let other = tracker
            .register_marker(NodeId(3), &PatternId::new("marker2.patt"))
            .unwrap();
        assert_eq!(other, MarkerHandle(1));
    }

    #[test]
    fn test_invalid_calibration_rejected() {
        let mut tracker = ReplayTracker::new(DetectionScript::default());
        let mut profile = calibration();
        profile.fx = 0.0;
        assert!(tracker.initialize(&profile).is_err());
    }

    #[test]
    fn test_script_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("detections.toml");
        std::fs::write(&path, toml::to_string(&script()).unwrap()).unwrap();
        assert_eq!(DetectionScript::from_file(&path).unwrap(), script());
        assert!(matches!(
            DetectionScript::from_file(&dir.path().join("absent.toml")),
            Err(TrackingError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_ready_after_grace_delay() {
        let mut capture = ReplayCapture::new(Handle::current(), Duration::from_millis(10), 4, 3);
        assert_eq!(capture.status(), CaptureStatus::Starting);
        capture.start();
        assert!(capture.frame().is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture.status(), CaptureStatus::Ready);
        let first = capture.frame().unwrap();
        let second = capture.frame().unwrap();
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(first.pixels.len(), 12);
    }

    #[tokio::test]
    async fn test_unavailable_capture_never_starts() {
        let mut capture = ReplayCapture::unavailable(Handle::current(), "no script");
        capture.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            capture.status(),
            CaptureStatus::Unavailable("no script".to_string())
        );
        assert!(capture.frame().is_none());
    }
}

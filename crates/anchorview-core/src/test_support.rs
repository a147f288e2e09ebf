//! Fakes for the external collaborators, shared by the unit tests

use glam::{Mat4, Vec3};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::asset::{
    AnimationClip, AssetError, AssetLoader, Channel, Interpolation, Keyframes, LoadReply,
    LoadedAsset, ModelNode, ModelScene,
};
use crate::camera::Camera;
use crate::marker::{MarkerSpec, PatternId};
use crate::render::{RenderError, Renderer, Viewport};
use crate::scene::{NodeId, SceneGraph};
use crate::tracking::{
    CalibrationProfile, CaptureSource, CaptureStatus, MarkerHandle, TrackingContext,
    TrackingError, TrackingSink, VideoFrame,
};
use crate::transform::Transform;

pub fn calibration() -> CalibrationProfile {
    CalibrationProfile {
        width: 640,
        height: 480,
        fx: 570.0,
        fy: 570.0,
        cx: 320.0,
        cy: 240.0,
        near: 0.01,
        far: 20.0,
    }
}

pub fn specs(count: usize) -> Vec<MarkerSpec> {
    (1..=count)
        .map(|i| {
            MarkerSpec::new(format!("marker{i}.patt"), format!("asset{i}.glb"))
                .with_caption(format!("marker {i}"))
        })
        .collect()
}

/// Single-node model without animation
pub fn static_asset() -> LoadedAsset {
    LoadedAsset {
        scene: ModelScene {
            nodes: vec![ModelNode {
                name: "body".to_string(),
                parent: None,
                transform: Transform::IDENTITY,
                mesh: Some(0),
            }],
        },
        clips: Vec::new(),
    }
}

/// Single-node model with a 2 second clip moving the node from origin to +X
pub fn animated_asset() -> LoadedAsset {
    let mut asset = static_asset();
    asset.clips.push(AnimationClip::new(
        "spin",
        vec![Channel {
            target: 0,
            times: vec![0.0, 2.0],
            keyframes: Keyframes::Translation(vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)]),
            interpolation: Interpolation::Linear,
        }],
    ));
    asset
}

#[derive(Debug, Default)]
pub struct TrackerState {
    pub fail_init: bool,
    pub reject_registration: bool,
    pub fail_updates: bool,
    pub initialized: bool,
    pub registrations: Vec<(NodeId, PatternId)>,
    pub updates: u32,
    /// Markers the next update will report as detected, with their pose
    pub detected: BTreeMap<PatternId, Mat4>,
    reported: BTreeSet<u32>,
}

/// Tracker that reports whatever the test put into `detected`
#[derive(Debug, Clone, Default)]
pub struct FakeTracker {
    pub state: Rc<RefCell<TrackerState>>,
}

impl FakeTracker {
    pub fn detect(&self, pattern: &str, pose: Mat4) {
        self.state
            .borrow_mut()
            .detected
            .insert(PatternId::new(pattern), pose);
    }

    pub fn lose(&self, pattern: &str) {
        self.state
            .borrow_mut()
            .detected
            .remove(&PatternId::new(pattern));
    }

    pub fn updates(&self) -> u32 {
        self.state.borrow().updates
    }
}

impl TrackingContext for FakeTracker {
    fn initialize(&mut self, calibration: &CalibrationProfile) -> Result<Mat4, TrackingError> {
        let mut state = self.state.borrow_mut();
        if state.fail_init {
            return Err(TrackingError::InvalidCalibration("camera_para missing".to_string()));
        }
        state.initialized = true;
        Ok(calibration.projection_matrix())
    }

    fn register_marker(
        &mut self,
        anchor: NodeId,
        pattern: &PatternId,
    ) -> Result<MarkerHandle, TrackingError> {
        let mut state = self.state.borrow_mut();
        if state.reject_registration || state.registrations.iter().any(|(_, p)| p == pattern) {
            return Err(TrackingError::DuplicatePattern(pattern.clone()));
        }
        state.registrations.push((anchor, pattern.clone()));
        Ok(MarkerHandle(state.registrations.len() as u32 - 1))
    }

    fn update(
        &mut self,
        frame: &VideoFrame,
        sink: &mut dyn TrackingSink,
    ) -> Result<(), TrackingError> {
        let mut state = self.state.borrow_mut();
        state.updates += 1;
        if state.fail_updates {
            return Err(TrackingError::Update {
                sequence: frame.sequence,
                reason: "detector stalled".to_string(),
            });
        }

        let mut now_detected = BTreeSet::new();
        for (index, (_, pattern)) in state.registrations.iter().enumerate() {
            if let Some(pose) = state.detected.get(pattern) {
                let handle = MarkerHandle(index as u32);
                sink.pose(handle, *pose);
                now_detected.insert(handle.0);
            }
        }
        for handle in now_detected.difference(&state.reported) {
            sink.found(MarkerHandle(*handle));
        }
        for handle in state.reported.difference(&now_detected) {
            sink.lost(MarkerHandle(*handle));
        }
        state.reported = now_detected;
        Ok(())
    }
}

#[derive(Debug)]
pub struct CaptureState {
    pub status: CaptureStatus,
    pub started: bool,
    pub frames: u64,
}

/// Capture source whose readiness the test switches by hand
#[derive(Debug, Clone)]
pub struct FakeCapture {
    pub state: Rc<RefCell<CaptureState>>,
}

impl Default for FakeCapture {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(CaptureState {
                status: CaptureStatus::Starting,
                started: false,
                frames: 0,
            })),
        }
    }
}

impl FakeCapture {
    pub fn set_status(&self, status: CaptureStatus) {
        self.state.borrow_mut().status = status;
    }
}

impl CaptureSource for FakeCapture {
    fn start(&mut self) {
        self.state.borrow_mut().started = true;
    }

    fn status(&self) -> CaptureStatus {
        self.state.borrow().status.clone()
    }

    fn frame(&mut self) -> Option<VideoFrame> {
        let mut state = self.state.borrow_mut();
        if state.status != CaptureStatus::Ready {
            return None;
        }
        state.frames += 1;
        Some(VideoFrame {
            sequence: state.frames,
            width: 640,
            height: 480,
            pixels: Arc::from(vec![0u8; 16]),
        })
    }
}

/// Loader that parks every reply until the test completes it
#[derive(Debug, Clone, Default)]
pub struct ManualLoader {
    pending: Rc<RefCell<Vec<LoadReply>>>,
}

impl ManualLoader {
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.pending
            .borrow()
            .iter()
            .map(|reply| reply.path().to_string())
            .collect()
    }

    /// Complete the oldest pending request for `path`
    pub fn complete(&self, path: &str, result: Result<LoadedAsset, AssetError>) -> bool {
        let mut pending = self.pending.borrow_mut();
        let Some(index) = pending.iter().position(|reply| reply.path() == path) else {
            return false;
        };
        pending.remove(index).send(result)
    }
}

impl AssetLoader for ManualLoader {
    fn load(&self, _path: &str, reply: LoadReply) {
        self.pending.borrow_mut().push(reply);
    }
}

#[derive(Debug, Default)]
pub struct RenderState {
    pub prepared: Option<Viewport>,
    pub fail_prepare: bool,
    pub fail_render: bool,
    pub renders: u32,
    /// Node count of the scene at each successful render
    pub scene_sizes: Vec<usize>,
    pub projection: Option<Mat4>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    pub state: Rc<RefCell<RenderState>>,
}

impl RecordingRenderer {
    pub fn renders(&self) -> u32 {
        self.state.borrow().renders
    }
}

impl Renderer for RecordingRenderer {
    fn prepare(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        let mut state = self.state.borrow_mut();
        if state.fail_prepare {
            return Err(RenderError::SurfaceUnavailable("no GPU context".to_string()));
        }
        state.prepared = Some(viewport);
        Ok(())
    }

    fn render(&mut self, scene: &SceneGraph, camera: &Camera) -> Result<(), RenderError> {
        let mut state = self.state.borrow_mut();
        state.renders += 1;
        if state.fail_render {
            return Err(RenderError::Draw("lost context".to_string()));
        }
        state.scene_sizes.push(scene.len());
        state.projection = Some(camera.projection);
        Ok(())
    }
}

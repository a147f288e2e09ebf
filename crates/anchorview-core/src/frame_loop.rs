//! Session startup, per-frame scheduling and teardown
//!
//! The frame loop owns the scene, camera and every marker binding. All mutation
//! happens on the thread that calls [`FrameLoop::tick_at`]; asset loads finishing
//! elsewhere are queued and applied at the start of the next tick.

use glam::{Mat4, Vec3};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::animation;
use crate::asset::{AssetLoader, LoadCompletion};
use crate::binding::{BindingError, BindingId, BindingSnapshot, MarkerBinding, MarkerEvents};
use crate::camera::{Camera, CameraSettings, OrbitControls};
use crate::marker::MarkerSpec;
use crate::render::{RenderError, Renderer, Viewport};
use crate::scene::{DirectionalLight, NodeId, NodeKind, SceneError, SceneGraph};
use crate::tracking::{
    CalibrationProfile, CaptureSource, CaptureStatus, MarkerHandle, TrackingContext, TrackingSink,
};
use crate::transform::Transform;
use crate::visibility::{OverlayStatus, TrackingStatus, VisibilityAggregator, VisibilityPolicy};

const LIGHT_POSITION: Vec3 = Vec3::new(2.4, 2.0, 5.0);

/// Consecutive failed tracking updates before tracking is reported unavailable
const TRACKING_FAILURE_LIMIT: u32 = 30;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("No markers configured")]
    NoMarkers,
    #[error("Renderer initialization failed: {0}")]
    Renderer(#[from] RenderError),
    #[error("Scene setup failed: {0}")]
    Scene(#[from] SceneError),
}

/// Static session parameters
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub viewport: Viewport,
    /// Calibration for the tracking context; `None` leaves tracking unavailable
    pub calibration: Option<CalibrationProfile>,
    pub camera: CameraSettings,
    pub visibility: VisibilityPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            viewport: Viewport::new(640, 480),
            calibration: None,
            camera: CameraSettings::default(),
            visibility: VisibilityPolicy::default(),
        }
    }
}

/// The four external collaborators, constructed by the host
pub struct Collaborators {
    pub renderer: Box<dyn Renderer>,
    pub loader: Box<dyn AssetLoader>,
    pub tracker: Box<dyn TrackingContext>,
    pub capture: Box<dyn CaptureSource>,
}

/// Elapsed time between consecutive ticks
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seconds since the previous call. The first call returns zero.
    pub fn delta(&mut self, now: Instant) -> f32 {
        let delta = self
            .last
            .map(|last| now.saturating_duration_since(last).as_secs_f32())
            .unwrap_or(0.0);
        self.last = Some(now);
        delta
    }
}

/// What happened during one tick
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub delta: f32,
    /// Models attached from completed loads
    pub loads_completed: usize,
    pub animations: usize,
    pub tracked: bool,
    pub camera_moved: bool,
    pub rendered: bool,
}

/// Returned by [`FrameLoop::teardown`]
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub frames: u64,
    pub overlay: OverlayStatus,
    pub bindings: Vec<BindingSnapshot>,
    pub tracking_updates: u64,
    pub tracking_failures: u64,
    pub render_failures: u64,
}

pub struct FrameLoop {
    scene: SceneGraph,
    camera: Camera,
    controls: OrbitControls,
    light: NodeId,
    bindings: Vec<MarkerBinding>,
    markers: HashMap<MarkerHandle, BindingId>,
    visibility: VisibilityAggregator,
    clock: FrameClock,
    completions_tx: mpsc::UnboundedSender<LoadCompletion>,
    completions_rx: mpsc::UnboundedReceiver<LoadCompletion>,
    renderer: Box<dyn Renderer>,
    loader: Box<dyn AssetLoader>,
    tracker: Box<dyn TrackingContext>,
    capture: Box<dyn CaptureSource>,
    tracking_initialized: bool,
    frames: u64,
    tracking_updates: u64,
    tracking_failures: u64,
    consecutive_tracking_failures: u32,
    render_failures: u64,
}

impl FrameLoop {
    /// Build the session: renderer surface, scene, camera, light, tracking context,
    /// one binding per marker (each issuing its load), then the capture source.
    ///
    /// Only renderer and scene wiring failures are fatal. A tracking context that
    /// fails to initialise leaves the session running with tracking unavailable.
    pub fn start(
        settings: SessionSettings,
        collaborators: Collaborators,
        specs: Vec<MarkerSpec>,
    ) -> Result<Self, StartupError> {
        if specs.is_empty() {
            return Err(StartupError::NoMarkers);
        }

        let Collaborators {
            mut renderer,
            loader,
            mut tracker,
            capture,
        } = collaborators;

        renderer.prepare(settings.viewport)?;

        let mut scene = SceneGraph::new();
        let mut camera = Camera::perspective(&settings.camera, settings.viewport.aspect());

        let light = scene.create_node("light", NodeKind::Light(DirectionalLight::WHITE));
        scene.set_transform(light, Transform::from_translation(LIGHT_POSITION))?;
        scene.add_to_root(light)?;

        let mut visibility = VisibilityAggregator::new(settings.visibility);
        let tracking_initialized = match &settings.calibration {
            Some(profile) => match tracker.initialize(profile) {
                Ok(projection) => {
                    camera.set_projection(projection);
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Tracking context failed to initialize");
                    visibility.set_tracking(TrackingStatus::Unavailable {
                        reason: format!("tracking initialization failed: {e}"),
                    });
                    false
                }
            },
            None => {
                warn!("No calibration profile, tracking disabled");
                visibility.set_tracking(TrackingStatus::Unavailable {
                    reason: "no calibration profile".to_string(),
                });
                false
            }
        };

        let controls = OrbitControls::new(&camera, Vec3::ZERO, settings.camera.damping);
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let mut frame_loop = Self {
            scene,
            camera,
            controls,
            light,
            bindings: Vec::with_capacity(specs.len()),
            markers: HashMap::new(),
            visibility,
            clock: FrameClock::new(),
            completions_tx,
            completions_rx,
            renderer,
            loader,
            tracker,
            capture,
            tracking_initialized,
            frames: 0,
            tracking_updates: 0,
            tracking_failures: 0,
            consecutive_tracking_failures: 0,
            render_failures: 0,
        };

        for spec in specs {
            let pattern = spec.pattern.clone();
            if let Err(e) = frame_loop.register(spec) {
                warn!(pattern = %pattern, error = %e, "Marker registration failed, marker will not be tracked");
            }
        }

        frame_loop.capture.start();

        info!(
            markers = frame_loop.bindings.len(),
            tracking = frame_loop.tracking_initialized,
            visibility = ?frame_loop.visibility.policy(),
            viewport_width = settings.viewport.width,
            viewport_height = settings.viewport.height,
            "Session started"
        );
        Ok(frame_loop)
    }

    /// Register a marker and request its asset. Registering a pattern that is
    /// already bound returns the existing binding.
    pub fn register(&mut self, spec: MarkerSpec) -> Result<BindingId, BindingError> {
        if let Some(existing) = self.bindings.iter().find(|b| b.spec().pattern == spec.pattern) {
            debug!(pattern = %spec.pattern, binding = %existing.id(), "Marker already registered");
            return Ok(existing.id());
        }

        let id = BindingId(self.bindings.len());
        let mut binding =
            MarkerBinding::register(id, spec, &mut self.scene, self.tracker.as_mut())?;
        self.markers.insert(binding.marker(), id);
        binding.start_load(self.loader.as_ref(), &self.completions_tx);
        self.bindings.push(binding);
        Ok(id)
    }

    pub fn subscribe(&self) -> watch::Receiver<OverlayStatus> {
        self.visibility.subscribe()
    }

    /// Apply every load completion queued since the last call.
    /// Returns how many models were attached.
    pub fn pump_loads(&mut self) -> usize {
        let mut attached = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            let Some(binding) = self.bindings.get_mut(completion.binding.0) else {
                warn!(binding = %completion.binding, path = %completion.path, "Load completion for unknown binding");
                continue;
            };
            if binding.complete_load(completion.result, &mut self.scene) {
                attached += 1;
            }
        }
        attached
    }

    /// Re-issue the load of every failed binding. Returns how many were retried.
    pub fn retry_failed(&mut self) -> usize {
        let mut retried = 0;
        for binding in &mut self.bindings {
            if binding.retry(self.loader.as_ref(), &self.completions_tx) {
                retried += 1;
            }
        }
        retried
    }

    pub fn tick(&mut self) -> FrameReport {
        self.tick_at(Instant::now())
    }

    /// Run one frame: completed loads, elapsed time, animations, tracking,
    /// camera controls, render. A failing step is logged and the rest still run.
    pub fn tick_at(&mut self, now: Instant) -> FrameReport {
        let loads_completed = self.pump_loads();
        let delta = self.clock.delta(now);

        let animations = animation::advance_all(
            self.bindings.iter_mut().filter_map(MarkerBinding::driver_mut),
            delta,
            &mut self.scene,
        );

        let tracked = self.track();
        let camera_moved = self.controls.update(&mut self.camera);

        let rendered = match self.renderer.render(&self.scene, &self.camera) {
            Ok(()) => true,
            Err(e) => {
                self.render_failures += 1;
                warn!(frame = self.frames, error = %e, "Render failed");
                false
            }
        };

        let report = FrameReport {
            frame: self.frames,
            delta,
            loads_completed,
            animations,
            tracked,
            camera_moved,
            rendered,
        };
        self.frames += 1;
        report
    }

    // At most one tracking update per tick, and only once the source is ready.
    fn track(&mut self) -> bool {
        if !self.tracking_initialized {
            return false;
        }

        match self.capture.status() {
            CaptureStatus::Starting => return false,
            CaptureStatus::Unavailable(reason) => {
                if !matches!(self.visibility.status().tracking, TrackingStatus::Unavailable { .. }) {
                    warn!(reason = %reason, "Capture source unavailable");
                    self.visibility.set_tracking(TrackingStatus::Unavailable {
                        reason: format!("capture unavailable: {reason}"),
                    });
                }
                return false;
            }
            CaptureStatus::Ready => {
                if self.visibility.status().tracking != TrackingStatus::Active
                    && self.consecutive_tracking_failures < TRACKING_FAILURE_LIMIT
                {
                    info!("Capture source ready, tracking active");
                    self.visibility.set_tracking(TrackingStatus::Active);
                }
            }
        }

        let Some(frame) = self.capture.frame() else {
            return false;
        };

        let mut router = TrackingRouter {
            scene: &mut self.scene,
            bindings: &mut self.bindings,
            markers: &self.markers,
            visibility: &mut self.visibility,
        };
        self.tracking_updates += 1;
        match self.tracker.update(&frame, &mut router) {
            Ok(()) => {
                if self.consecutive_tracking_failures >= TRACKING_FAILURE_LIMIT {
                    info!(frame = frame.sequence, "Tracking recovered");
                    self.visibility.set_tracking(TrackingStatus::Active);
                }
                self.consecutive_tracking_failures = 0;
                true
            }
            Err(e) => {
                self.tracking_failures += 1;
                self.consecutive_tracking_failures += 1;
                warn!(frame = frame.sequence, error = %e, "Tracking update failed");
                if self.consecutive_tracking_failures == TRACKING_FAILURE_LIMIT {
                    warn!(
                        failures = self.consecutive_tracking_failures,
                        "Tracking keeps failing, reporting it unavailable"
                    );
                    self.visibility.set_tracking(TrackingStatus::Unavailable {
                        reason: format!("tracking update failed: {e}"),
                    });
                }
                false
            }
        }
    }

    /// Drive ticks at `period` until `shutdown` turns true (or its sender is
    /// dropped) or `max_frames` ticks have run. Returns the number of ticks run.
    pub async fn run(
        &mut self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        max_frames: Option<u64>,
    ) -> u64 {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(period_ms = period.as_millis() as u64, "Frame loop started");

        let mut ran = 0;
        loop {
            if max_frames.is_some_and(|max| ran >= max) || *shutdown.borrow() {
                break;
            }
            tokio::select! {
                now = ticker.tick() => {
                    self.tick_at(now);
                    ran += 1;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(frames = ran, "Frame loop stopped");
        ran
    }

    /// Stop the session. Loads still in flight are discarded.
    pub fn teardown(self) -> SessionSummary {
        let summary = SessionSummary {
            frames: self.frames,
            overlay: self.visibility.status(),
            bindings: self.bindings.iter().map(MarkerBinding::snapshot).collect(),
            tracking_updates: self.tracking_updates,
            tracking_failures: self.tracking_failures,
            render_failures: self.render_failures,
        };
        info!(
            frames = summary.frames,
            marker_visible = summary.overlay.marker_visible,
            tracking_failures = summary.tracking_failures,
            render_failures = summary.render_failures,
            "Session torn down"
        );
        summary
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Orbit input (rotate, dolly) is applied on the next tick
    pub fn controls_mut(&mut self) -> &mut OrbitControls {
        &mut self.controls
    }

    pub fn light(&self) -> NodeId {
        self.light
    }

    pub fn bindings(&self) -> &[MarkerBinding] {
        &self.bindings
    }

    pub fn binding(&self, id: BindingId) -> Option<&MarkerBinding> {
        self.bindings.get(id.0)
    }

    pub fn visibility(&self) -> &VisibilityAggregator {
        &self.visibility
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn tracking_initialized(&self) -> bool {
        self.tracking_initialized
    }
}

/// Routes tracking results to the binding that registered each marker
struct TrackingRouter<'a> {
    scene: &'a mut SceneGraph,
    bindings: &'a mut [MarkerBinding],
    markers: &'a HashMap<MarkerHandle, BindingId>,
    visibility: &'a mut VisibilityAggregator,
}

impl TrackingRouter<'_> {
    fn binding_mut(&mut self, marker: MarkerHandle) -> Option<&mut MarkerBinding> {
        let id = self.markers.get(&marker)?;
        self.bindings.get_mut(id.0)
    }
}

impl TrackingSink for TrackingRouter<'_> {
    fn pose(&mut self, marker: MarkerHandle, pose: Mat4) {
        let Some(anchor) = self.binding_mut(marker).map(|b| b.anchor()) else {
            debug!(?marker, "Pose for unknown marker");
            return;
        };
        if let Err(e) = self.scene.set_matrix(anchor, pose) {
            warn!(?marker, error = %e, "Failed to pose anchor");
        }
    }

    fn found(&mut self, marker: MarkerHandle) {
        let Some(id) = self.markers.get(&marker).copied() else {
            debug!(?marker, "Found event for unknown marker");
            return;
        };
        if let Some(binding) = self.bindings.get_mut(id.0) {
            binding.on_found(&mut *self.visibility);
        }
    }

    fn lost(&mut self, marker: MarkerHandle) {
        let Some(id) = self.markers.get(&marker).copied() else {
            debug!(?marker, "Lost event for unknown marker");
            return;
        };
        if let Some(binding) = self.bindings.get_mut(id.0) {
            binding.on_lost(&mut *self.visibility);
        }
    }
}

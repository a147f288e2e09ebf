//! Marker bindings: one tracked anchor and one content slot per marker
//!
//! A binding is created eagerly with its anchor node so the tracking context has
//! something to pose before the asset arrives. Content moves through
//! `Anchored -> Loading -> Ready | Failed` and is never unloaded.

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::animation::AnimationDriver;
use crate::asset::{self, AssetError, AssetLoader, LoadCompletion, LoadReply, LoadedAsset, ModelHandle};
use crate::marker::MarkerSpec;
use crate::scene::{NodeId, NodeKind, SceneError, SceneGraph};
use crate::tracking::{MarkerHandle, TrackingContext, TrackingError};
use crate::visibility::VisibilityAggregator;

#[derive(Error, Debug)]
pub enum BindingError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
}

/// Index of a binding within its session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BindingId(pub usize);

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum BindingState {
    /// Anchor exists, no content requested yet
    Anchored,
    /// Asset request in flight
    Loading,
    /// Model attached under the anchor
    Ready,
    /// Load failed; content will not appear unless retried
    Failed(String),
}

/// Found/lost notifications dispatched by the tracking router
pub trait MarkerEvents {
    fn on_found(&mut self, visibility: &mut VisibilityAggregator);
    fn on_lost(&mut self, visibility: &mut VisibilityAggregator);
}

pub struct MarkerBinding {
    id: BindingId,
    spec: MarkerSpec,
    anchor: NodeId,
    marker: MarkerHandle,
    state: BindingState,
    model: Option<ModelHandle>,
    driver: Option<AnimationDriver>,
    detected: bool,
    found_count: u32,
}

impl MarkerBinding {
    /// Create the anchor node, add it to the scene and register the pattern for tracking
    pub fn register(
        id: BindingId,
        spec: MarkerSpec,
        scene: &mut SceneGraph,
        tracker: &mut dyn TrackingContext,
    ) -> Result<Self, BindingError> {
        let anchor = scene.create_node(format!("anchor:{}", spec.pattern), NodeKind::Anchor);
        scene.add_to_root(anchor)?;
        let marker = match tracker.register_marker(anchor, &spec.pattern) {
            Ok(marker) => marker,
            Err(e) => {
                scene.detach(anchor)?;
                return Err(e.into());
            }
        };

        info!(binding = %id, pattern = %spec.pattern, anchor = %anchor, "Marker registered");

        Ok(Self {
            id,
            spec,
            anchor,
            marker,
            state: BindingState::Anchored,
            model: None,
            driver: None,
            detected: false,
            found_count: 0,
        })
    }

    /// Issue the asset request. Only the first call does anything.
    pub fn start_load(
        &mut self,
        loader: &dyn AssetLoader,
        completions: &mpsc::UnboundedSender<LoadCompletion>,
    ) -> bool {
        if self.state != BindingState::Anchored {
            return false;
        }
        self.state = BindingState::Loading;
        debug!(binding = %self.id, asset = %self.spec.asset, "Requesting asset");
        let reply = LoadReply::new(self.id, self.spec.asset.clone(), completions.clone());
        loader.load(&self.spec.asset, reply);
        true
    }

    /// Re-issue the asset request after a failure
    pub fn retry(
        &mut self,
        loader: &dyn AssetLoader,
        completions: &mpsc::UnboundedSender<LoadCompletion>,
    ) -> bool {
        if !matches!(self.state, BindingState::Failed(_)) {
            return false;
        }
        info!(binding = %self.id, asset = %self.spec.asset, "Retrying asset load");
        self.state = BindingState::Anchored;
        self.start_load(loader, completions)
    }

    /// Apply a load result. Returns `true` if a model was attached.
    pub fn complete_load(
        &mut self,
        result: Result<LoadedAsset, AssetError>,
        scene: &mut SceneGraph,
    ) -> bool {
        if self.state != BindingState::Loading {
            warn!(
                binding = %self.id,
                state = ?self.state,
                "Ignoring load completion for a binding that is not loading"
            );
            return false;
        }

        let attached = result
            .and_then(|asset| asset.validate().map(|()| asset))
            .map_err(|e| e.to_string())
            .and_then(|asset| {
                let clips = asset.clips.len();
                self.attach_model(asset, scene)
                    .map(|()| clips)
                    .map_err(|e| e.to_string())
            });

        match attached {
            Ok(clips) => {
                info!(binding = %self.id, asset = %self.spec.asset, clips, "Asset ready");
                self.state = BindingState::Ready;
                true
            }
            Err(reason) => {
                warn!(binding = %self.id, asset = %self.spec.asset, error = %reason, "Asset load failed");
                self.state = BindingState::Failed(reason);
                false
            }
        }
    }

    fn attach_model(&mut self, asset: LoadedAsset, scene: &mut SceneGraph) -> Result<(), SceneError> {
        let handle = asset::instantiate(scene, &asset.scene, &format!("model:{}", self.spec.asset))?;
        scene.set_transform(handle.root, self.spec.placement.to_transform())?;
        scene.attach(self.anchor, handle.root)?;

        if let Some(clip) = asset.clips.into_iter().next() {
            debug!(binding = %self.id, clip = %clip.name, duration = clip.duration, "Starting animation");
            let mut driver = AnimationDriver::new(clip, &handle).with_loop_mode(self.spec.animation);
            driver.start(scene);
            self.driver = Some(driver);
        }
        self.model = Some(handle);
        Ok(())
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn spec(&self) -> &MarkerSpec {
        &self.spec
    }

    pub fn anchor(&self) -> NodeId {
        self.anchor
    }

    pub fn marker(&self) -> MarkerHandle {
        self.marker
    }

    pub fn state(&self) -> &BindingState {
        &self.state
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn driver(&self) -> Option<&AnimationDriver> {
        self.driver.as_ref()
    }

    pub fn driver_mut(&mut self) -> Option<&mut AnimationDriver> {
        self.driver.as_mut()
    }

    pub fn is_detected(&self) -> bool {
        self.detected
    }

    pub fn found_count(&self) -> u32 {
        self.found_count
    }

    pub fn snapshot(&self) -> BindingSnapshot {
        BindingSnapshot {
            pattern: self.spec.pattern.to_string(),
            asset: self.spec.asset.clone(),
            state: self.state.clone(),
            detected: self.detected,
            found_count: self.found_count,
            animation: self.driver.as_ref().map(|d| d.clip().name.clone()),
        }
    }
}

impl MarkerEvents for MarkerBinding {
    fn on_found(&mut self, visibility: &mut VisibilityAggregator) {
        if !self.detected {
            self.detected = true;
            self.found_count += 1;
            info!(binding = %self.id, pattern = %self.spec.pattern, "Marker found");
        }
        visibility.found(self.id, &self.spec.caption);
    }

    // Content keeps rendering at the last known pose.
    fn on_lost(&mut self, visibility: &mut VisibilityAggregator) {
        if self.detected {
            self.detected = false;
            info!(binding = %self.id, pattern = %self.spec.pattern, "Marker lost");
        }
        visibility.lost(self.id);
    }
}

/// Telemetry view of a binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindingSnapshot {
    pub pattern: String,
    pub asset: String,
    pub state: BindingState,
    pub detected: bool,
    pub found_count: u32,
    pub animation: Option<String>,
}

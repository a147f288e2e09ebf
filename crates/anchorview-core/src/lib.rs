//! Anchorview Core - Marker-to-content orchestration and frame loop
//!
//! This crate binds tracked fiducial markers to dynamically loaded 3D content:
//! - Marker specifications and one binding (anchor node + content slot) per marker
//! - Scene graph and camera handed to the external renderer every frame
//! - Animation drivers advanced by the frame clock
//! - Visibility aggregation of marker found/lost events for the presentation layer
//! - Trait boundaries for the renderer, asset loader, tracking context and capture source

pub mod animation;
pub mod asset;
pub mod binding;
pub mod camera;
pub mod frame_loop;
pub mod marker;
pub mod render;
pub mod scene;
pub mod tracking;
pub mod transform;
pub mod visibility;

#[cfg(test)]
mod test_support;

pub use animation::{AnimationDriver, LoopMode};
pub use asset::{
    AnimationClip, AssetError, AssetLoader, Channel, Interpolation, Keyframes, LoadCompletion,
    LoadReply, LoadedAsset, ModelHandle, ModelNode, ModelScene,
};
pub use binding::{BindingError, BindingId, BindingSnapshot, BindingState, MarkerBinding, MarkerEvents};
pub use camera::{Camera, CameraSettings, OrbitControls};
pub use frame_loop::{
    Collaborators, FrameClock, FrameLoop, FrameReport, SessionSettings, SessionSummary,
    StartupError,
};
pub use marker::{MarkerSpec, PatternId, Placement};
pub use render::{RenderError, Renderer, Viewport};
pub use scene::{DirectionalLight, NodeId, NodeKind, SceneError, SceneGraph, SceneNode};
pub use tracking::{
    CalibrationProfile, CaptureSource, CaptureStatus, MarkerHandle, TrackingContext,
    TrackingError, TrackingSink, VideoFrame,
};
pub use transform::Transform;
pub use visibility::{OverlayStatus, TrackingStatus, VisibilityAggregator, VisibilityPolicy};

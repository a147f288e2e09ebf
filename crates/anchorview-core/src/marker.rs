//! Marker specifications: which printed pattern carries which asset

use glam::{EulerRot, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::animation::LoopMode;
use crate::transform::Transform;

/// Identifier of a fiducial pattern, taken from its pattern file path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub String);

impl PatternId {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PatternId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Placement of a loaded model relative to its marker anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub position: [f32; 3],
    /// XYZ Euler angles in radians
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
}

fn unit_scale() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: unit_scale(),
        }
    }
}

impl Placement {
    pub fn to_transform(&self) -> Transform {
        let [rx, ry, rz] = self.rotation;
        Transform {
            translation: Vec3::from(self.position),
            rotation: Quat::from_euler(EulerRot::XYZ, rx, ry, rz),
            scale: Vec3::from(self.scale),
        }
    }
}

/// One physical marker design and the content shown on it.
/// Immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerSpec {
    /// Pattern file identifying the marker (e.g., "marker.patt")
    pub pattern: PatternId,
    /// Asset path handed to the loader (e.g., "asset.glb")
    pub asset: String,
    #[serde(flatten)]
    pub placement: Placement,
    /// Description shown by the presentation layer when the marker is found
    #[serde(default)]
    pub caption: String,
    /// Playback of the asset's first animation clip
    #[serde(default)]
    pub animation: LoopMode,
}

impl MarkerSpec {
    pub fn new(pattern: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            pattern: PatternId::new(pattern),
            asset: asset.into(),
            placement: Placement::default(),
            caption: String::new(),
            animation: LoopMode::default(),
        }
    }

    pub fn with_placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_animation(mut self, animation: LoopMode) -> Self {
        self.animation = animation;
        self
    }
}

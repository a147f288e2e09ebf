//! Loaded asset data and the asset loader gateway
//!
//! Asset parsing happens outside this crate. A loader receives a path and a
//! single-use [`LoadReply`]; whatever thread it finishes on, the reply marshals the
//! result back onto the frame loop through a channel, where it is applied to the
//! owning binding between frames.

use glam::{Quat, Vec3};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::binding::BindingId;
use crate::scene::{NodeId, NodeKind, SceneError, SceneGraph};
use crate::transform::Transform;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse asset {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("Asset {0} contains no scene")]
    NoScene(String),
    #[error("Invalid model node {index}: {reason}")]
    InvalidNode { index: usize, reason: String },
    #[error("Invalid animation channel in clip {clip}: {reason}")]
    InvalidChannel { clip: String, reason: String },
}

/// A node of a loaded model. Parents always precede their children.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelNode {
    pub name: String,
    pub parent: Option<usize>,
    pub transform: Transform,
    pub mesh: Option<usize>,
}

/// Node hierarchy of a loaded model
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelScene {
    pub nodes: Vec<ModelNode>,
}

impl ModelScene {
    pub fn validate(&self) -> Result<(), AssetError> {
        for (index, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent {
                if parent >= index {
                    return Err(AssetError::InvalidNode {
                        index,
                        reason: format!("parent {} does not precede it", parent),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Keyframes {
    Translation(Vec<Vec3>),
    Rotation(Vec<Quat>),
    Scale(Vec<Vec3>),
}

impl Keyframes {
    pub fn len(&self) -> usize {
        match self {
            Keyframes::Translation(values) | Keyframes::Scale(values) => values.len(),
            Keyframes::Rotation(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A sampled channel value, ready to be written into a node transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    Translation(Vec3),
    Rotation(Quat),
    Scale(Vec3),
}

impl ChannelValue {
    pub fn apply(self, transform: &mut Transform) {
        match self {
            ChannelValue::Translation(v) => transform.translation = v,
            ChannelValue::Rotation(q) => transform.rotation = q,
            ChannelValue::Scale(v) => transform.scale = v,
        }
    }
}

/// Keyframed property of one model node
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    /// Index into [`ModelScene::nodes`]
    pub target: usize,
    /// Keyframe times in seconds, non-decreasing
    pub times: Vec<f32>,
    pub keyframes: Keyframes,
    pub interpolation: Interpolation,
}

impl Channel {
    pub fn duration(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Sample the channel at `time` seconds, holding the first/last key outside the range
    pub fn sample(&self, time: f32) -> Option<ChannelValue> {
        let (prev, next, factor) = keyframe_span(&self.times, time)?;
        let factor = match self.interpolation {
            Interpolation::Step => 0.0,
            Interpolation::Linear => factor,
        };
        let value = match &self.keyframes {
            Keyframes::Translation(values) => {
                ChannelValue::Translation(values.get(prev)?.lerp(*values.get(next)?, factor))
            }
            Keyframes::Rotation(values) => ChannelValue::Rotation(
                values.get(prev)?.slerp(*values.get(next)?, factor).normalize(),
            ),
            Keyframes::Scale(values) => {
                ChannelValue::Scale(values.get(prev)?.lerp(*values.get(next)?, factor))
            }
        };
        Some(value)
    }

    fn validate(&self, clip: &str, node_count: usize) -> Result<(), AssetError> {
        let invalid = |reason: String| AssetError::InvalidChannel {
            clip: clip.to_string(),
            reason,
        };
        if self.target >= node_count {
            return Err(invalid(format!(
                "target node {} out of range ({} nodes)",
                self.target, node_count
            )));
        }
        if self.times.is_empty() {
            return Err(invalid("no keyframes".to_string()));
        }
        if self.times.len() != self.keyframes.len() {
            return Err(invalid(format!(
                "{} keyframe times but {} values",
                self.times.len(),
                self.keyframes.len()
            )));
        }
        if self.times.iter().any(|t| !t.is_finite()) {
            return Err(invalid("non-finite keyframe time".to_string()));
        }
        if self.times.windows(2).any(|w| w[1] < w[0]) {
            return Err(invalid("keyframe times are not sorted".to_string()));
        }
        Ok(())
    }
}

/// Locate the keyframes around `time`: (previous index, next index, blend factor)
fn keyframe_span(times: &[f32], time: f32) -> Option<(usize, usize, f32)> {
    let last = times.len().checked_sub(1)?;
    if time <= times[0] {
        return Some((0, 0, 0.0));
    }
    if time >= times[last] {
        return Some((last, last, 0.0));
    }
    let next = times.partition_point(|&t| t <= time);
    let prev = next - 1;
    let span = times[next] - times[prev];
    let factor = if span > 0.0 {
        (time - times[prev]) / span
    } else {
        0.0
    };
    Some((prev, next, factor))
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    /// Length in seconds (end of the longest channel)
    pub duration: f32,
    pub channels: Vec<Channel>,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, channels: Vec<Channel>) -> Self {
        let duration = channels
            .iter()
            .map(Channel::duration)
            .fold(0.0_f32, f32::max);
        Self {
            name: name.into(),
            duration,
            channels,
        }
    }
}

/// Result of a successful load: the model and its animation clips
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedAsset {
    pub scene: ModelScene,
    pub clips: Vec<AnimationClip>,
}

impl LoadedAsset {
    pub fn validate(&self) -> Result<(), AssetError> {
        self.scene.validate()?;
        for clip in &self.clips {
            for channel in &clip.channels {
                channel.validate(&clip.name, self.scene.nodes.len())?;
            }
        }
        Ok(())
    }
}

/// Completion of one load request, delivered to the frame loop
#[derive(Debug)]
pub struct LoadCompletion {
    pub binding: BindingId,
    pub path: String,
    pub result: Result<LoadedAsset, AssetError>,
}

/// Single-use reply slot for one load request
#[derive(Debug)]
pub struct LoadReply {
    binding: BindingId,
    path: String,
    tx: mpsc::UnboundedSender<LoadCompletion>,
}

impl LoadReply {
    pub fn new(
        binding: BindingId,
        path: impl Into<String>,
        tx: mpsc::UnboundedSender<LoadCompletion>,
    ) -> Self {
        Self {
            binding,
            path: path.into(),
            tx,
        }
    }

    pub fn binding(&self) -> BindingId {
        self.binding
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Deliver the result. Returns `false` if the session has already been torn down.
    pub fn send(self, result: Result<LoadedAsset, AssetError>) -> bool {
        self.tx
            .send(LoadCompletion {
                binding: self.binding,
                path: self.path,
                result,
            })
            .is_ok()
    }
}

/// Asset loader gateway.
///
/// `load` must not block: it starts the work and answers through `reply` later,
/// from any thread.
pub trait AssetLoader {
    fn load(&self, path: &str, reply: LoadReply);
}

/// Scene nodes created for a loaded model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub root: NodeId,
    /// Scene node for each [`ModelScene::nodes`] entry, index-aligned
    pub nodes: Vec<NodeId>,
}

/// Create scene nodes for `model` under a new, detached model root
pub fn instantiate(
    scene: &mut SceneGraph,
    model: &ModelScene,
    name: &str,
) -> Result<ModelHandle, SceneError> {
    let root = scene.create_node(name, NodeKind::Model);
    let mut nodes = Vec::with_capacity(model.nodes.len());
    for model_node in &model.nodes {
        let id = scene.create_node(model_node.name.clone(), NodeKind::Group);
        if let Some(node) = scene.node_mut(id) {
            node.transform = model_node.transform;
            node.mesh = model_node.mesh;
        }
        let parent = model_node
            .parent
            .and_then(|p| nodes.get(p).copied())
            .unwrap_or(root);
        scene.attach(parent, id)?;
        nodes.push(id);
    }
    Ok(ModelHandle { root, nodes })
}

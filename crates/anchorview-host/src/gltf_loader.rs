//! glTF 2.0 / GLB asset loader

use anchorview_core::{
    AnimationClip, AssetError, AssetLoader, Channel, Interpolation, Keyframes, LoadReply,
    LoadedAsset, ModelNode, ModelScene, Transform,
};
use glam::{Quat, Vec3};
use gltf::animation::util::ReadOutputs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// Loads assets relative to `root` on the blocking thread pool
pub struct GltfLoader {
    root: PathBuf,
    runtime: Handle,
}

impl GltfLoader {
    pub fn new(root: impl Into<PathBuf>, runtime: Handle) -> Self {
        Self {
            root: root.into(),
            runtime,
        }
    }
}

impl AssetLoader for GltfLoader {
    fn load(&self, path: &str, reply: LoadReply) {
        let full_path = self.root.join(path);
        debug!(path = %full_path.display(), binding = %reply.binding(), "Loading glTF asset");
        self.runtime.spawn_blocking(move || {
            let result = load_gltf(&full_path);
            if let Err(e) = &result {
                warn!(path = %full_path.display(), error = %e, "glTF load failed");
            }
            if !reply.send(result) {
                debug!(path = %full_path.display(), "Session ended before load completed");
            }
        });
    }
}

/// Load the default scene and all TRS animations of a glTF file
pub fn load_gltf(path: &Path) -> Result<LoadedAsset, AssetError> {
    let path_str = path.display().to_string();
    let gltf::Gltf { document, blob } =
        gltf::Gltf::open(path).map_err(|e| gltf_error(&path_str, e))?;
    let buffers = gltf::import_buffers(&document, path.parent(), blob)
        .map_err(|e| gltf_error(&path_str, e))?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| AssetError::NoScene(path_str.clone()))?;

    // Depth-first so parents precede children
    let mut nodes = Vec::new();
    let mut node_index: HashMap<usize, usize> = HashMap::new();
    let mut stack: Vec<(gltf::Node, Option<usize>)> =
        scene.nodes().map(|node| (node, None)).collect();
    stack.reverse();

    while let Some((node, parent)) = stack.pop() {
        if node_index.contains_key(&node.index()) {
            continue;
        }
        let (translation, rotation, scale) = node.transform().decomposed();
        let index = nodes.len();
        node_index.insert(node.index(), index);
        nodes.push(ModelNode {
            name: node
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("node{}", node.index())),
            parent,
            transform: Transform {
                translation: Vec3::from(translation),
                rotation: Quat::from_array(rotation),
                scale: Vec3::from(scale),
            },
            mesh: node.mesh().map(|mesh| mesh.index()),
        });

        let children: Vec<_> = node.children().collect();
        for child in children.into_iter().rev() {
            stack.push((child, Some(index)));
        }
    }

    let mut clips = Vec::new();
    for animation in document.animations() {
        let name = animation
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("animation{}", animation.index()));
        let mut channels = Vec::new();

        for channel in animation.channels() {
            let Some(&target) = node_index.get(&channel.target().node().index()) else {
                debug!(clip = %name, "Skipping channel targeting a node outside the scene");
                continue;
            };
            let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
            let times: Vec<f32> = reader
                .read_inputs()
                .ok_or_else(|| parse_error(&path_str, format!("clip {name} has no keyframe times")))?
                .collect();
            let outputs = reader
                .read_outputs()
                .ok_or_else(|| parse_error(&path_str, format!("clip {name} has no keyframe values")))?;

            let sampler = channel.sampler().interpolation();
            let cubic = sampler == gltf::animation::Interpolation::CubicSpline;
            let keyframes = match outputs {
                ReadOutputs::Translations(values) => {
                    Keyframes::Translation(value_keys(values.map(Vec3::from), cubic))
                }
                ReadOutputs::Rotations(values) => {
                    Keyframes::Rotation(value_keys(values.into_f32().map(Quat::from_array), cubic))
                }
                ReadOutputs::Scales(values) => {
                    Keyframes::Scale(value_keys(values.map(Vec3::from), cubic))
                }
                ReadOutputs::MorphTargetWeights(_) => {
                    debug!(clip = %name, "Skipping morph target channel");
                    continue;
                }
            };
            let interpolation = match sampler {
                gltf::animation::Interpolation::Step => Interpolation::Step,
                _ => Interpolation::Linear,
            };

            channels.push(Channel {
                target,
                times,
                keyframes,
                interpolation,
            });
        }

        if channels.is_empty() {
            debug!(clip = %name, "Skipping clip without usable channels");
            continue;
        }
        clips.push(AnimationClip::new(name, channels));
    }

    debug!(path = %path_str, nodes = nodes.len(), clips = clips.len(), "Parsed glTF asset");
    Ok(LoadedAsset {
        scene: ModelScene { nodes },
        clips,
    })
}

// Cubic-spline outputs are (in-tangent, value, out-tangent) triples.
fn value_keys<T: Copy>(values: impl Iterator<Item = T>, cubic: bool) -> Vec<T> {
    let values: Vec<T> = values.collect();
    if cubic {
        values.chunks_exact(3).map(|triple| triple[1]).collect()
    } else {
        values
    }
}

fn gltf_error(path: &str, error: gltf::Error) -> AssetError {
    match error {
        gltf::Error::Io(source) => AssetError::Io {
            path: path.to_string(),
            source,
        },
        other => parse_error(path, other.to_string()),
    }
}

fn parse_error(path: &str, reason: String) -> AssetError {
    AssetError::Parse {
        path: path.to_string(),
        reason,
    }
}

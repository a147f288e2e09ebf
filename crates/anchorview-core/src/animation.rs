//! Animation playback bound to a loaded model

use serde::{Deserialize, Serialize};

use crate::asset::{AnimationClip, ModelHandle};
use crate::scene::{NodeId, SceneGraph};

/// What happens when playback passes the end of the clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Wrap around indefinitely
    #[default]
    Repeat,
    /// Hold the last pose
    Once,
}

/// Time-accumulating player for one clip on one model instance
#[derive(Debug, Clone)]
pub struct AnimationDriver {
    clip: AnimationClip,
    targets: Vec<NodeId>,
    loop_mode: LoopMode,
    time: f32,
}

impl AnimationDriver {
    pub fn new(clip: AnimationClip, model: &ModelHandle) -> Self {
        Self {
            clip,
            targets: model.nodes.clone(),
            loop_mode: LoopMode::default(),
            time: 0.0,
        }
    }

    pub fn with_loop_mode(mut self, loop_mode: LoopMode) -> Self {
        self.loop_mode = loop_mode;
        self
    }

    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    /// Total playback time since start, in seconds
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Position within the clip that playback time maps to
    pub fn sample_time(&self) -> f32 {
        let duration = self.clip.duration;
        match self.loop_mode {
            LoopMode::Repeat if duration > 0.0 => self.time.rem_euclid(duration),
            LoopMode::Repeat => 0.0,
            LoopMode::Once => self.time.min(duration),
        }
    }

    /// Rewind and pose the model at the first frame
    pub fn start(&mut self, scene: &mut SceneGraph) {
        self.time = 0.0;
        self.apply(scene);
    }

    /// Advance playback by `delta` seconds. Large deltas are not clamped.
    pub fn tick(&mut self, delta: f32, scene: &mut SceneGraph) {
        if delta.is_nan() || delta <= 0.0 {
            return;
        }
        self.time += delta;
        self.apply(scene);
    }

    fn apply(&self, scene: &mut SceneGraph) {
        let time = self.sample_time();
        for channel in &self.clip.channels {
            let Some(&node_id) = self.targets.get(channel.target) else {
                continue;
            };
            let (Some(value), Some(node)) = (channel.sample(time), scene.node_mut(node_id)) else {
                continue;
            };
            value.apply(&mut node.transform);
        }
    }
}

/// Advance every live driver by the same frame delta. Returns how many were advanced.
pub fn advance_all<'a>(
    drivers: impl IntoIterator<Item = &'a mut AnimationDriver>,
    delta: f32,
    scene: &mut SceneGraph,
) -> usize {
    let mut advanced = 0;
    for driver in drivers {
        driver.tick(delta, scene);
        advanced += 1;
    }
    advanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{instantiate, Channel, Interpolation, Keyframes, ModelNode, ModelScene};
    use crate::transform::Transform;
    use glam::Vec3;

    fn slide_model(scene: &mut SceneGraph) -> (ModelHandle, AnimationClip) {
        let model = ModelScene {
            nodes: vec![ModelNode {
                name: "slider".to_string(),
                parent: None,
                transform: Transform::from_translation(Vec3::new(9.0, 9.0, 9.0)),
                mesh: Some(0),
            }],
        };
        let handle = instantiate(scene, &model, "model").unwrap();
        let clip = AnimationClip::new(
            "slide",
            vec![Channel {
                target: 0,
                times: vec![0.0, 2.0],
                keyframes: Keyframes::Translation(vec![Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)]),
                interpolation: Interpolation::Linear,
            }],
        );
        (handle, clip)
    }

    fn translation(scene: &SceneGraph, id: NodeId) -> Vec3 {
        scene.node(id).unwrap().transform.translation
    }

    #[test]
    fn test_start_applies_first_frame() {
        let mut scene = SceneGraph::new();
        let (handle, clip) = slide_model(&mut scene);
        let mut driver = AnimationDriver::new(clip, &handle);
        driver.start(&mut scene);
        assert_eq!(translation(&scene, handle.nodes[0]), Vec3::ZERO);
    }

    #[test]
    fn test_zero_delta_leaves_pose_untouched() {
        let mut scene = SceneGraph::new();
        let (handle, clip) = slide_model(&mut scene);
        let mut driver = AnimationDriver::new(clip, &handle);
        driver.start(&mut scene);
        driver.tick(0.5, &mut scene);

        let node = handle.nodes[0];
        let mut moved = scene.node(node).unwrap().transform;
        moved.translation = Vec3::new(-7.0, 0.0, 0.0);
        scene.set_transform(node, moved).unwrap();

        driver.tick(0.0, &mut scene);
        assert_eq!(translation(&scene, node), Vec3::new(-7.0, 0.0, 0.0));
        assert_eq!(driver.time(), 0.5);
    }

    #[test]
    fn test_split_ticks_match_single_tick() {
        let mut scene_a = SceneGraph::new();
        let (handle_a, clip_a) = slide_model(&mut scene_a);
        let mut split = AnimationDriver::new(clip_a, &handle_a);
        split.start(&mut scene_a);
        split.tick(0.3, &mut scene_a);
        split.tick(0.45, &mut scene_a);

        let mut scene_b = SceneGraph::new();
        let (handle_b, clip_b) = slide_model(&mut scene_b);
        let mut single = AnimationDriver::new(clip_b, &handle_b);
        single.start(&mut scene_b);
        single.tick(0.75, &mut scene_b);

        assert!((split.time() - single.time()).abs() < 1e-6);
        assert!(translation(&scene_a, handle_a.nodes[0])
            .abs_diff_eq(translation(&scene_b, handle_b.nodes[0]), 1e-5));
        assert!(translation(&scene_b, handle_b.nodes[0])
            .abs_diff_eq(Vec3::new(0.75, 0.0, 0.0), 1e-5));
    }

    #[test]
    fn test_repeat_wraps_and_large_delta_jumps() {
        let mut scene = SceneGraph::new();
        let (handle, clip) = slide_model(&mut scene);
        let mut driver = AnimationDriver::new(clip, &handle);
        driver.start(&mut scene);
        driver.tick(5.0, &mut scene);
        assert_eq!(driver.time(), 5.0);
        assert!((driver.sample_time() - 1.0).abs() < 1e-6);
        assert!(translation(&scene, handle.nodes[0]).abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn test_once_holds_last_pose() {
        let mut scene = SceneGraph::new();
        let (handle, clip) = slide_model(&mut scene);
        let mut driver = AnimationDriver::new(clip, &handle).with_loop_mode(LoopMode::Once);
        driver.start(&mut scene);
        driver.tick(5.0, &mut scene);
        assert_eq!(driver.sample_time(), 2.0);
        assert_eq!(translation(&scene, handle.nodes[0]), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_advance_all_counts_drivers() {
        let mut scene = SceneGraph::new();
        let (handle, clip) = slide_model(&mut scene);
        let mut drivers = vec![
            AnimationDriver::new(clip.clone(), &handle),
            AnimationDriver::new(clip, &handle),
        ];
        assert_eq!(advance_all(drivers.iter_mut(), 0.1, &mut scene), 2);
        assert!(drivers.iter().all(|d| (d.time() - 0.1).abs() < 1e-6));
    }
}

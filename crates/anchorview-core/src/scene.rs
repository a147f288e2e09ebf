//! Scene graph handed to the renderer each frame
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Node ids stay valid
//! for the whole session; detaching a node only unlinks it from the hierarchy.

use glam::Mat4;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transform::Transform;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SceneError {
    #[error("Unknown scene node: {0}")]
    UnknownNode(NodeId),
    #[error("Attaching {child} under {parent} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

/// Handle to a node in a [`SceneGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    /// Linear RGB
    pub color: [f32; 3],
    pub intensity: f32,
}

impl DirectionalLight {
    pub const WHITE: Self = Self {
        color: [1.0, 1.0, 1.0],
        intensity: 1.0,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Plain grouping node (also used for nodes of a loaded model)
    Group,
    /// Node posed by the tracking context
    Anchor,
    /// Root of an instantiated model
    Model,
    Light(DirectionalLight),
}

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub transform: Transform,
    /// Mesh index within the owning asset
    pub mesh: Option<usize>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
    roots: Vec<NodeId>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a detached node
    pub fn create_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(SceneNode {
            name: name.into(),
            kind,
            transform: Transform::IDENTITY,
            mesh: None,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    /// Number of nodes ever created
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SceneNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId(index as u32), node))
    }

    /// Add a node at the top level of the scene.
    /// Returns `false` if it already was a top-level node.
    pub fn add_to_root(&mut self, id: NodeId) -> Result<bool, SceneError> {
        self.check(id)?;
        if self.roots.contains(&id) {
            return Ok(false);
        }
        self.unlink(id);
        self.roots.push(id);
        Ok(true)
    }

    /// Attach `child` under `parent`, moving it from wherever it was before
    pub fn attach(&mut self, parent: NodeId, child: NodeId) -> Result<(), SceneError> {
        self.check(parent)?;
        self.check(child)?;

        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return Err(SceneError::Cycle { parent, child });
            }
            cursor = self.nodes[id.0 as usize].parent;
        }

        if self.nodes[child.0 as usize].parent == Some(parent) {
            return Ok(());
        }
        self.unlink(child);
        self.nodes[child.0 as usize].parent = Some(parent);
        self.nodes[parent.0 as usize].children.push(child);
        Ok(())
    }

    /// Remove a node (and its subtree) from the hierarchy
    pub fn detach(&mut self, id: NodeId) -> Result<(), SceneError> {
        self.check(id)?;
        self.unlink(id);
        Ok(())
    }

    pub fn set_transform(&mut self, id: NodeId, transform: Transform) -> Result<(), SceneError> {
        let node = self.node_mut(id).ok_or(SceneError::UnknownNode(id))?;
        node.transform = transform;
        Ok(())
    }

    pub fn set_matrix(&mut self, id: NodeId, matrix: Mat4) -> Result<(), SceneError> {
        self.set_transform(id, Transform::from_matrix(matrix))
    }

    /// Compose local transforms from the top of the hierarchy down to `id`
    pub fn world_matrix(&self, id: NodeId) -> Result<Mat4, SceneError> {
        let mut node = self.node(id).ok_or(SceneError::UnknownNode(id))?;
        let mut matrix = node.transform.to_matrix();
        while let Some(parent) = node.parent {
            node = &self.nodes[parent.0 as usize];
            matrix = node.transform.to_matrix() * matrix;
        }
        Ok(matrix)
    }

    /// Whether the node is reachable from a top-level node
    pub fn is_in_scene(&self, id: NodeId) -> bool {
        let Some(mut node) = self.node(id) else {
            return false;
        };
        let mut top = id;
        while let Some(parent) = node.parent {
            top = parent;
            node = &self.nodes[parent.0 as usize];
        }
        self.roots.contains(&top)
    }

    /// Depth-first walk of every node reachable from the top level
    pub fn visit(&self, mut visitor: impl FnMut(NodeId, &SceneNode, &Mat4)) {
        let mut stack: Vec<(NodeId, Mat4)> = self
            .roots
            .iter()
            .rev()
            .map(|&id| (id, Mat4::IDENTITY))
            .collect();
        while let Some((id, parent_world)) = stack.pop() {
            let node = &self.nodes[id.0 as usize];
            let world = parent_world * node.transform.to_matrix();
            visitor(id, node, &world);
            for &child in node.children.iter().rev() {
                stack.push((child, world));
            }
        }
    }

    fn check(&self, id: NodeId) -> Result<(), SceneError> {
        if (id.0 as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(SceneError::UnknownNode(id))
        }
    }

    fn unlink(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0 as usize].parent.take() {
            self.nodes[parent.0 as usize].children.retain(|&c| c != id);
        }
        self.roots.retain(|&r| r != id);
    }
}

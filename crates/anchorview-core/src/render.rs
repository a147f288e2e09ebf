//! Renderer boundary

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::Camera;
use crate::scene::SceneGraph;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("No drawable surface: {0}")]
    SurfaceUnavailable(String),
    #[error("Draw failed: {0}")]
    Draw(String),
}

/// Output surface size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; 1.0 for a degenerate viewport
    pub fn aspect(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

/// External rendering engine: draws a scene graph through a camera
pub trait Renderer {
    /// Acquire the drawing surface. Failure here aborts startup.
    fn prepare(&mut self, viewport: Viewport) -> Result<(), RenderError>;

    fn render(&mut self, scene: &SceneGraph, camera: &Camera) -> Result<(), RenderError>;
}

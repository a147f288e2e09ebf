//! Renderer that draws nothing and counts what it would have drawn

use anchorview_core::{Camera, NodeKind, RenderError, Renderer, SceneGraph, Viewport};
use std::time::Instant;
use tracing::{debug, info};

/// Per-frame draw statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub nodes: usize,
    pub anchors: usize,
    pub models: usize,
    /// Models whose origin falls inside the view frustum
    pub visible_models: usize,
}

pub struct HeadlessRenderer {
    viewport: Option<Viewport>,
    frames: u64,
    log_every: u64,
    last: FrameStats,
    window_start: Option<Instant>,
}

impl HeadlessRenderer {
    /// Log frame statistics once every `log_every` frames
    pub fn new(log_every: u64) -> Self {
        Self {
            viewport: None,
            frames: 0,
            log_every: log_every.max(1),
            last: FrameStats::default(),
            window_start: None,
        }
    }

    #[cfg(test)]
    fn frames(&self) -> u64 {
        self.frames
    }

    #[cfg(test)]
    fn last_frame(&self) -> FrameStats {
        self.last
    }

    /// Frames per second over the window since the previous log
    fn window_fps(&mut self, now: Instant) -> f64 {
        let fps = match self.window_start {
            Some(start) => {
                let elapsed = now.duration_since(start).as_secs_f64();
                if elapsed > 0.0 {
                    self.log_every as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.window_start = Some(now);
        fps
    }
}

impl Renderer for HeadlessRenderer {
    fn prepare(&mut self, viewport: Viewport) -> Result<(), RenderError> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(RenderError::SurfaceUnavailable(format!(
                "viewport {}x{} has no area",
                viewport.width, viewport.height
            )));
        }
        info!(width = viewport.width, height = viewport.height, "Headless surface ready");
        self.viewport = Some(viewport);
        Ok(())
    }

    fn render(&mut self, scene: &SceneGraph, camera: &Camera) -> Result<(), RenderError> {
        if self.viewport.is_none() {
            return Err(RenderError::SurfaceUnavailable(
                "render called before prepare".to_string(),
            ));
        }

        let view_projection = camera.view_projection();
        let mut stats = FrameStats::default();
        scene.visit(|_, node, world| {
            stats.nodes += 1;
            match node.kind {
                NodeKind::Anchor => stats.anchors += 1,
                NodeKind::Model => {
                    stats.models += 1;
                    let clip = view_projection * world.w_axis;
                    let inside = clip.w > 0.0 && clip.truncate().abs().max_element() <= clip.w;
                    if inside {
                        stats.visible_models += 1;
                    }
                }
                _ => {}
            }
        });

        self.frames += 1;
        self.last = stats;
        if self.frames % self.log_every == 1 || self.log_every == 1 {
            let fps = self.window_fps(Instant::now());
            debug!(
                frame = self.frames,
                fps = format_args!("{fps:.1}"),
                nodes = self.last.nodes,
                anchors = self.last.anchors,
                models = self.last.models,
                visible_models = self.last.visible_models,
                "Frame drawn"
            );
        }
        Ok(())
    }
}

//! Frame pipeline: turns a render pass into backend draw calls.

use crate::accelerated::VertexBatchRenderer;
use crate::capability::Capabilities;
use crate::path::PathRenderer;
use crate::renderer::{BackendKind, DrawRegion, FrameStats, RenderContext, RenderResult, Renderer};
use lessonboard_core::dirty::{DirtyRegions, rects_overlap};
use lessonboard_core::{RenderPass, SceneObject};
use peniko::Color;

/// Drives the accelerated backend when the host has one and the path
/// backend otherwise. A failing accelerated frame drops to the path
/// backend for the rest of the session.
pub struct DualModeRenderer {
    accelerated: Option<VertexBatchRenderer>,
    path: PathRenderer,
    scale_factor: f64,
    background: Color,
}

impl DualModeRenderer {
    pub fn new(caps: Capabilities) -> Self {
        let accelerated = match caps.backend() {
            BackendKind::Accelerated => Some(VertexBatchRenderer::new(caps.max_vertices)),
            BackendKind::Path => None,
        };
        log::info!("renderer backend: {:?}", caps.backend());
        Self {
            accelerated,
            path: PathRenderer::new(),
            scale_factor: 1.0,
            background: Color::from_rgba8(255, 255, 255, 255),
        }
    }

    pub fn set_scale_factor(&mut self, scale_factor: f64) {
        self.scale_factor = scale_factor;
    }

    pub fn set_background(&mut self, color: Color) {
        self.background = color;
    }

    pub fn backend_kind(&self) -> BackendKind {
        if self.accelerated.is_some() {
            BackendKind::Accelerated
        } else {
            BackendKind::Path
        }
    }

    pub fn accelerated(&self) -> Option<&VertexBatchRenderer> {
        self.accelerated.as_ref()
    }

    pub fn path(&self) -> &PathRenderer {
        &self.path
    }

    pub fn path_mut(&mut self) -> &mut PathRenderer {
        &mut self.path
    }

    /// Draw the dirty part of a pass: renderable, on-screen objects that
    /// touch a dirty region, with the preview on top.
    pub fn render(&mut self, pass: &RenderPass<'_>) -> RenderResult<FrameStats> {
        let mut culled = 0;
        let candidates: Vec<&SceneObject> = pass
            .view
            .iter()
            .filter(|obj| obj.is_renderable())
            .filter(|obj| {
                let visible = pass.culler.is_visible(&obj.id());
                if !visible {
                    culled += 1;
                }
                visible
            })
            .collect();

        let mut ctx = RenderContext::new(pass.camera.transform(), pass.camera.zoom, pass.viewport)
            .with_scale_factor(self.scale_factor)
            .with_background(self.background);
        ctx.preview = pass.preview;
        ctx.full = pass.is_full();

        let device = ctx.device_transform();
        match &pass.regions {
            DirtyRegions::Clean => {}
            DirtyRegions::Full => ctx.regions.push(DrawRegion {
                clip: None,
                objects: candidates,
            }),
            DirtyRegions::Partial(rects) => {
                for rect in rects {
                    let objects: Vec<&SceneObject> = candidates
                        .iter()
                        .copied()
                        .filter(|obj| rects_overlap(obj.bounds(), *rect))
                        .collect();
                    ctx.regions.push(DrawRegion {
                        clip: Some(device.transform_rect_bbox(*rect)),
                        objects,
                    });
                }
            }
        }

        let backend = self.build(&ctx)?;
        Ok(FrameStats {
            backend,
            objects_drawn: ctx.object_count(),
            objects_culled: culled,
            regions_drawn: ctx.regions.len(),
            full: ctx.full,
        })
    }

    fn build(&mut self, ctx: &RenderContext<'_>) -> RenderResult<BackendKind> {
        if let Some(accelerated) = self.accelerated.as_mut() {
            match accelerated.build_frame(ctx) {
                Ok(()) => return Ok(BackendKind::Accelerated),
                Err(e) => {
                    log::warn!("accelerated frame failed, switching to path backend: {e}");
                    self.accelerated = None;
                }
            }
        }
        self.path.build_frame(ctx)?;
        Ok(BackendKind::Path)
    }
}

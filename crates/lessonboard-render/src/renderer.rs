//! Renderer trait abstraction.

use kurbo::{Affine, Rect, Size};
use lessonboard_core::shapes::SceneObject;
use peniko::Color;
use thiserror::Error;

/// Renderer errors.
#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Initialization failed: {0}")]
    InitFailed(String),
    #[error("Render failed: {0}")]
    RenderFailed(String),
    #[error("Surface error: {0}")]
    Surface(String),
    #[error("{0:?} backend is not supported on this host")]
    Unsupported(BackendKind),
}

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RendererError>;

/// Which drawing pipeline produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Point/line vertex batches for a GPU-style pipeline.
    Accelerated,
    /// Immediate-mode 2D path commands.
    #[default]
    Path,
}

/// One dirty area in screen space, with the objects that touch it.
#[derive(Debug, Clone)]
pub struct DrawRegion<'a> {
    /// Clip in device pixels; `None` draws over the whole viewport.
    pub clip: Option<Rect>,
    /// Objects to draw, bottom to top.
    pub objects: Vec<&'a SceneObject>,
}

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// World to screen.
    pub transform: Affine,
    pub zoom: f64,
    /// Viewport size in physical pixels.
    pub viewport_size: Size,
    /// Device pixel ratio (for HiDPI).
    pub scale_factor: f64,
    pub background_color: Color,
    pub regions: Vec<DrawRegion<'a>>,
    /// Local preview drawn on top of everything.
    pub preview: Option<&'a SceneObject>,
    pub full: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(transform: Affine, zoom: f64, viewport_size: Size) -> Self {
        Self {
            transform,
            zoom,
            viewport_size,
            scale_factor: 1.0,
            background_color: Color::from_rgba8(255, 255, 255, 255),
            regions: Vec::new(),
            preview: None,
            full: false,
        }
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    /// Device transform: camera then HiDPI scale.
    pub fn device_transform(&self) -> Affine {
        Affine::scale(self.scale_factor) * self.transform
    }

    pub fn viewport_rect(&self) -> Rect {
        Rect::from_origin_size((0.0, 0.0), self.viewport_size)
    }

    pub fn object_count(&self) -> usize {
        self.regions.iter().map(|r| r.objects.len()).sum()
    }
}

/// What one render pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub backend: BackendKind,
    pub objects_drawn: usize,
    /// Renderable objects skipped because they are off screen.
    pub objects_culled: usize,
    pub regions_drawn: usize,
    pub full: bool,
}

/// Trait for rendering backends.
pub trait Renderer: Send {
    fn kind(&self) -> BackendKind;

    /// Build the command buffer for a frame.
    fn build_frame(&mut self, ctx: &RenderContext<'_>) -> RenderResult<()>;

    /// Get the background color (for clearing).
    fn background_color(&self, ctx: &RenderContext<'_>) -> Color {
        ctx.background_color
    }
}

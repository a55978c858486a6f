//! Accelerated backend: point and line vertex batches plus overlays for
//! content the vertex pipeline does not draw (text, images).

use crate::renderer::{BackendKind, RenderContext, RenderResult, Renderer};
use crate::vertex::{LineVertex, PointVertex};
use kurbo::{Affine, Point, Rect};
use lessonboard_core::shapes::{Figure, ImageObject, SceneObject, Stroke, TextBox};
use peniko::Color;

/// Curve flattening tolerance in screen pixels.
const FLATTEN_TOLERANCE: f64 = 0.25;

/// One draw call's worth of vertices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexBatch {
    /// Scissor rectangle in device pixels.
    pub clip: Option<Rect>,
    pub points: Vec<PointVertex>,
    pub lines: Vec<LineVertex>,
}

impl VertexBatch {
    fn new(clip: Option<Rect>) -> Self {
        Self {
            clip,
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.points.len() + self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    /// Raw bytes for upload, no copy.
    pub fn point_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.points)
    }

    pub fn line_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.lines)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub clip: Option<Rect>,
    pub position: Point,
    pub content: String,
    pub font_size: f64,
    pub color: Color,
    pub formula: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageOverlay {
    pub clip: Option<Rect>,
    pub rect: Rect,
    pub source: String,
}

/// Builds vertex batches for a GPU-style point/line pipeline.
pub struct VertexBatchRenderer {
    max_vertices: usize,
    /// Areas to clear before drawing, in device pixels.
    clears: Vec<Rect>,
    batches: Vec<VertexBatch>,
    texts: Vec<TextOverlay>,
    images: Vec<ImageOverlay>,
    background: Color,
}

impl VertexBatchRenderer {
    pub fn new(max_vertices: usize) -> Self {
        Self {
            max_vertices: max_vertices.max(crate::capability::MIN_BATCH_VERTICES),
            clears: Vec::new(),
            batches: Vec::new(),
            texts: Vec::new(),
            images: Vec::new(),
            background: Color::from_rgba8(255, 255, 255, 255),
        }
    }

    pub fn max_vertices(&self) -> usize {
        self.max_vertices
    }

    pub fn batches(&self) -> &[VertexBatch] {
        &self.batches
    }

    pub fn clears(&self) -> &[Rect] {
        &self.clears
    }

    pub fn text_overlays(&self) -> &[TextOverlay] {
        &self.texts
    }

    pub fn image_overlays(&self) -> &[ImageOverlay] {
        &self.images
    }

    pub fn clear_color(&self) -> Color {
        self.background
    }

    pub fn vertex_count(&self) -> usize {
        self.batches.iter().map(VertexBatch::vertex_count).sum()
    }

    /// Current batch with room for `n` more vertices.
    fn reserve(&mut self, n: usize, clip: Option<Rect>) -> &mut VertexBatch {
        let full = self
            .batches
            .last()
            .is_none_or(|b| b.clip != clip || b.vertex_count() + n > self.max_vertices);
        if full {
            self.batches.push(VertexBatch::new(clip));
        }
        let last = self.batches.len() - 1;
        &mut self.batches[last]
    }

    fn push_polyline(&mut self, points: &[Point], width: f64, color: [f32; 4], clip: Option<Rect>, dabs: bool) {
        for pair in points.windows(2) {
            let batch = self.reserve(2, clip);
            batch.lines.push(LineVertex::new(pair[0], width, color));
            batch.lines.push(LineVertex::new(pair[1], width, color));
        }
        if dabs {
            // Round joins and caps.
            for p in points {
                self.reserve(1, clip).points.push(PointVertex::new(*p, width, color));
            }
        }
    }

    fn encode_stroke(&mut self, stroke: &Stroke, transform: Affine, scale: f64, clip: Option<Rect>) {
        let points: Vec<Point> = stroke.points().iter().map(|p| transform * *p).collect();
        self.push_polyline(&points, stroke.brush_size * scale, stroke.color.to_f32(), clip, true);
    }

    fn encode_figure(&mut self, figure: &Figure, transform: Affine, scale: f64, clip: Option<Rect>) {
        let color = figure.color.to_f32();
        for polyline in figure.outline(FLATTEN_TOLERANCE / scale.max(f64::EPSILON)) {
            let points: Vec<Point> = polyline.iter().map(|p| transform * *p).collect();
            self.push_polyline(&points, figure.brush_size * scale, color, clip, false);
        }
    }

    fn encode_text(&mut self, text: &TextBox, transform: Affine, scale: f64, clip: Option<Rect>) {
        self.texts.push(TextOverlay {
            clip,
            position: transform * text.position,
            content: text.content.clone(),
            font_size: text.font_size * scale,
            color: text.color.into(),
            formula: text.is_formula,
        });
    }

    fn encode_image(&mut self, image: &ImageObject, transform: Affine, clip: Option<Rect>) {
        let world = Rect::from_origin_size(image.position, (image.width, image.height));
        self.images.push(ImageOverlay {
            clip,
            rect: transform.transform_rect_bbox(world),
            source: image.source.clone(),
        });
    }

    fn encode(&mut self, object: &SceneObject, transform: Affine, scale: f64, clip: Option<Rect>) {
        match object {
            SceneObject::Stroke(s) => self.encode_stroke(s, transform, scale, clip),
            SceneObject::Figure(f) => self.encode_figure(f, transform, scale, clip),
            SceneObject::Text(t) => self.encode_text(t, transform, scale, clip),
            SceneObject::Image(i) => self.encode_image(i, transform, clip),
        }
    }
}

impl Renderer for VertexBatchRenderer {
    fn kind(&self) -> BackendKind {
        BackendKind::Accelerated
    }

    fn build_frame(&mut self, ctx: &RenderContext<'_>) -> RenderResult<()> {
        self.clears.clear();
        self.batches.clear();
        self.texts.clear();
        self.images.clear();
        self.background = self.background_color(ctx);

        let transform = ctx.device_transform();
        let scale = ctx.zoom * ctx.scale_factor;
        let viewport = Affine::scale(ctx.scale_factor).transform_rect_bbox(ctx.viewport_rect());

        for region in &ctx.regions {
            self.clears.push(region.clip.unwrap_or(viewport));
            for object in &region.objects {
                self.encode(object, transform, scale, region.clip);
            }
        }
        if let Some(preview) = ctx.preview {
            self.encode(preview, transform, scale, None);
        }
        self.batches.retain(|b| !b.is_empty());
        log::trace!(
            "accelerated frame: {} batches, {} vertices, {} text, {} images",
            self.batches.len(),
            self.vertex_count(),
            self.texts.len(),
            self.images.len()
        );
        Ok(())
    }
}

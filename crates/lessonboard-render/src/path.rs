//! Path backend: an immediate-mode 2D command list, the fallback when no
//! accelerated pipeline is available.

use crate::renderer::{BackendKind, RenderContext, RenderResult, Renderer};
use kurbo::{Affine, BezPath, Point, Rect};
use lessonboard_core::shapes::SceneObject;
use peniko::Color;

/// One drawing command, in device pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum PathCommand {
    /// Push a clip; paired with [`PathCommand::Restore`].
    Clip(Rect),
    Restore,
    Clear { rect: Rect, color: Color },
    /// Stroked with round caps and joins.
    StrokePath { path: BezPath, width: f64, color: Color },
    Text {
        position: Point,
        content: String,
        font_size: f64,
        color: Color,
        formula: bool,
    },
    Image { rect: Rect, source: String },
}

/// Records [`PathCommand`]s for a 2D canvas-style host.
#[derive(Default)]
pub struct PathRenderer {
    commands: Vec<PathCommand>,
}

impl PathRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands of the last built frame.
    pub fn commands(&self) -> &[PathCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<PathCommand> {
        std::mem::take(&mut self.commands)
    }

    fn draw(&mut self, object: &SceneObject, transform: Affine, scale: f64) {
        match object {
            SceneObject::Stroke(stroke) => {
                let mut path = object.to_path();
                path.apply_affine(transform);
                self.commands.push(PathCommand::StrokePath {
                    path,
                    width: stroke.brush_size * scale,
                    color: stroke.color.into(),
                });
            }
            SceneObject::Figure(figure) => {
                let mut path = object.to_path();
                path.apply_affine(transform);
                self.commands.push(PathCommand::StrokePath {
                    path,
                    width: figure.brush_size * scale,
                    color: figure.color.into(),
                });
            }
            SceneObject::Text(text) => self.commands.push(PathCommand::Text {
                position: transform * text.position,
                content: text.content.clone(),
                font_size: text.font_size * scale,
                color: text.color.into(),
                formula: text.is_formula,
            }),
            SceneObject::Image(image) => self.commands.push(PathCommand::Image {
                rect: transform.transform_rect_bbox(object.bounds()),
                source: image.source.clone(),
            }),
        }
    }
}

impl Renderer for PathRenderer {
    fn kind(&self) -> BackendKind {
        BackendKind::Path
    }

    fn build_frame(&mut self, ctx: &RenderContext<'_>) -> RenderResult<()> {
        self.commands.clear();
        let transform = ctx.device_transform();
        let scale = ctx.zoom * ctx.scale_factor;
        let background = self.background_color(ctx);
        let viewport = Affine::scale(ctx.scale_factor).transform_rect_bbox(ctx.viewport_rect());

        for region in &ctx.regions {
            let rect = region.clip.unwrap_or(viewport);
            if region.clip.is_some() {
                self.commands.push(PathCommand::Clip(rect));
            }
            self.commands.push(PathCommand::Clear { rect, color: background });
            for object in &region.objects {
                self.draw(object, transform, scale);
            }
            if region.clip.is_some() {
                self.commands.push(PathCommand::Restore);
            }
        }
        if let Some(preview) = ctx.preview {
            self.draw(preview, transform, scale);
        }
        log::trace!("path frame: {} commands", self.commands.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::DrawRegion;
    use kurbo::Size;
    use lessonboard_core::shapes::{BoardColor, Figure, FigureKind, ImageObject, Stroke, TextBox, stroke_id};

    fn ctx<'a>(regions: Vec<DrawRegion<'a>>) -> RenderContext<'a> {
        let mut ctx = RenderContext::new(Affine::IDENTITY, 1.0, Size::new(800.0, 600.0));
        ctx.regions = regions;
        ctx
    }

    #[test]
    fn test_renderer_creation() {
        let renderer = PathRenderer::new();
        assert_eq!(renderer.kind(), BackendKind::Path);
        assert!(renderer.commands().is_empty());
    }

    #[test]
    fn test_build_empty_scene() {
        let mut renderer = PathRenderer::new();
        let result = renderer.build_frame(&ctx(vec![DrawRegion { clip: None, objects: vec![] }]));
        assert!(result.is_ok());
        assert!(matches!(renderer.commands(), [PathCommand::Clear { .. }]));
    }

    #[test]
    fn test_build_scene_with_shapes() {
        let stroke = SceneObject::Stroke(Stroke::from_points(
            stroke_id("c", 1),
            vec![Point::new(0.0, 0.0), Point::new(50.0, 50.0)],
            BoardColor::black(),
            4.0,
            "u",
        ));
        let rect = SceneObject::Figure(Figure::new(
            FigureKind::Rectangle,
            Point::new(10.0, 10.0),
            Point::new(110.0, 60.0),
            BoardColor::black(),
            2.0,
        ));
        let formula = SceneObject::Text(TextBox::formula(Point::new(0.0, 0.0), "x^2".into()));
        let image = SceneObject::Image(ImageObject::new(Point::new(0.0, 0.0), 10.0, 10.0, "a.png"));

        let mut renderer = PathRenderer::new();
        let mut frame = ctx(vec![DrawRegion {
            clip: None,
            objects: vec![&stroke, &rect, &formula, &image],
        }]);
        frame.scale_factor = 2.0;
        renderer.build_frame(&frame).unwrap();

        let commands = renderer.commands();
        assert_eq!(commands.len(), 5);
        assert!(matches!(commands[1], PathCommand::StrokePath { width, .. } if width == 8.0));
        assert!(matches!(commands[3], PathCommand::Text { formula: true, .. }));
        assert!(matches!(&commands[4], PathCommand::Image { rect, .. } if *rect == Rect::new(0.0, 0.0, 20.0, 20.0)));
    }

    #[test]
    fn test_clipped_regions_are_balanced() {
        let mut renderer = PathRenderer::new();
        let clip = Rect::new(0.0, 0.0, 40.0, 40.0);
        renderer
            .build_frame(&ctx(vec![
                DrawRegion { clip: Some(clip), objects: vec![] },
                DrawRegion { clip: Some(clip + kurbo::Vec2::new(100.0, 0.0)), objects: vec![] },
            ]))
            .unwrap();
        let clips = renderer.commands().iter().filter(|c| matches!(c, PathCommand::Clip(_))).count();
        let restores = renderer.commands().iter().filter(|c| matches!(c, PathCommand::Restore)).count();
        assert_eq!(clips, 2);
        assert_eq!(restores, 2);
    }
}

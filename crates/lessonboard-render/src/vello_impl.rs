//! Encodes path-backend frames into a vello scene.

use crate::path::PathCommand;
use kurbo::{Affine, BezPath, Cap, Join, Point, Rect, Shape, Stroke};
use peniko::{Color, Fill, Mix};
use vello::Scene;

/// Replays [`PathCommand`]s into a [`vello::Scene`].
///
/// Text is left to the host's text stack; images are drawn as
/// placeholders until their source has been fetched and decoded.
#[derive(Default)]
pub struct VelloEncoder {
    scene: Scene,
    depth: usize,
}

impl VelloEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Reset and encode a whole frame.
    pub fn encode(&mut self, commands: &[PathCommand]) -> &Scene {
        self.scene.reset();
        self.depth = 0;
        for command in commands {
            self.encode_command(command);
        }
        // Unbalanced clips would leak into the next frame.
        while self.depth > 0 {
            self.scene.pop_layer();
            self.depth -= 1;
        }
        &self.scene
    }

    fn encode_command(&mut self, command: &PathCommand) {
        match command {
            PathCommand::Clip(rect) => {
                self.scene.push_layer(Mix::Normal, 1.0, Affine::IDENTITY, rect);
                self.depth += 1;
            }
            PathCommand::Restore => {
                if self.depth > 0 {
                    self.scene.pop_layer();
                    self.depth -= 1;
                }
            }
            PathCommand::Clear { rect, color } => {
                self.scene.fill(Fill::NonZero, Affine::IDENTITY, *color, None, rect);
            }
            PathCommand::StrokePath { path, width, color } => {
                let stroke = Stroke::new(*width).with_caps(Cap::Round).with_join(Join::Round);
                self.scene.stroke(&stroke, Affine::IDENTITY, *color, None, path);
            }
            PathCommand::Text { content, .. } => {
                log::trace!("text left to host: {} chars", content.len());
            }
            PathCommand::Image { rect, .. } => self.image_placeholder(*rect),
        }
    }

    fn image_placeholder(&mut self, bounds: Rect) {
        let outline = bounds.to_path(0.1);
        self.scene
            .fill(Fill::NonZero, Affine::IDENTITY, Color::from_rgba8(200, 200, 200, 255), None, &outline);

        let stroke = Stroke::new(2.0);
        let mut cross = BezPath::new();
        cross.move_to(Point::new(bounds.x0, bounds.y0));
        cross.line_to(Point::new(bounds.x1, bounds.y1));
        cross.move_to(Point::new(bounds.x1, bounds.y0));
        cross.line_to(Point::new(bounds.x0, bounds.y1));
        self.scene
            .stroke(&stroke, Affine::IDENTITY, Color::from_rgba8(150, 150, 150, 255), None, &cross);
        self.scene
            .stroke(&stroke, Affine::IDENTITY, Color::from_rgba8(100, 100, 100, 255), None, &outline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_balances_clips() {
        let mut encoder = VelloEncoder::new();
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        encoder.encode(&[
            PathCommand::Clip(rect),
            PathCommand::Clear {
                rect,
                color: Color::from_rgba8(255, 255, 255, 255),
            },
            PathCommand::Image {
                rect,
                source: "a.png".into(),
            },
        ]);
        assert_eq!(encoder.depth, 0);
    }
}

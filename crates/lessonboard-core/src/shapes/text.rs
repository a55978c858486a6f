//! Text and formula labels.

use super::{BoardColor, Drawable, ObjectId};
use kurbo::{BezPath, Point, Rect, Shape as KurboShape};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Average glyph advance relative to the font size, used for layout-free bounds.
const GLYPH_ADVANCE: f64 = 0.6;
/// Line height relative to the font size.
const LINE_HEIGHT: f64 = 1.2;

/// A text label anchored at its top-left corner.
///
/// Formulas are stored as their source (e.g. LaTeX); typesetting is the
/// host's concern, the board only needs the footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBox {
    pub(crate) id: ObjectId,
    pub position: Point,
    pub content: String,
    pub font_size: f64,
    pub color: BoardColor,
    #[serde(default)]
    pub is_formula: bool,
    #[serde(default)]
    pub owner_id: String,
}

impl TextBox {
    pub const DEFAULT_FONT_SIZE: f64 = 20.0;

    pub fn new(position: Point, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            content,
            font_size: Self::DEFAULT_FONT_SIZE,
            color: BoardColor::black(),
            is_formula: false,
            owner_id: String::new(),
        }
    }

    pub fn formula(position: Point, source: String) -> Self {
        Self {
            is_formula: true,
            ..Self::new(position, source)
        }
    }

    /// Estimated size from character counts.
    pub fn size(&self) -> (f64, f64) {
        let lines: Vec<&str> = self.content.lines().collect();
        let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0).max(1);
        let rows = lines.len().max(1);
        (
            longest as f64 * self.font_size * GLYPH_ADVANCE,
            rows as f64 * self.font_size * LINE_HEIGHT,
        )
    }
}

impl Drawable for TextBox {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn bounds(&self) -> Rect {
        let (w, h) = self.size();
        Rect::from_origin_size(self.position, (w, h))
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.bounds().inflate(tolerance, tolerance).contains(point)
    }

    fn to_path(&self) -> BezPath {
        self.bounds().to_path(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_grow_with_content() {
        let short = TextBox::new(Point::ZERO, "ab".into());
        let long = TextBox::new(Point::ZERO, "abcdef\nxy".into());
        assert!(long.bounds().width() > short.bounds().width());
        assert!(long.bounds().height() > short.bounds().height());
    }

    #[test]
    fn test_formula_flag() {
        let f = TextBox::formula(Point::new(1.0, 2.0), r"x^2".into());
        assert!(f.is_formula);
        assert!(f.hit_test(Point::new(2.0, 3.0), 0.0));
    }
}

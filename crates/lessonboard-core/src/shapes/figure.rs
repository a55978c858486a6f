//! Geometric figures drawn by dragging: rectangles, ellipses, lines and arrows.

use super::{BoardColor, Drawable, ObjectId, point_to_polyline_dist, point_to_segment_dist};
use kurbo::{BezPath, Ellipse, Point, Rect, Shape as KurboShape, Vec2};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Arrowhead length relative to the brush size, with a floor.
const ARROW_HEAD_FACTOR: f64 = 4.0;
const MIN_ARROW_HEAD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FigureKind {
    Rectangle,
    Ellipse,
    Line,
    Arrow,
}

/// A figure spanned by two drag points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Figure {
    pub(crate) id: ObjectId,
    pub kind: FigureKind,
    /// Drag start point.
    pub start: Point,
    /// Drag end point (arrowhead side for arrows).
    pub end: Point,
    pub color: BoardColor,
    pub brush_size: f64,
    #[serde(default)]
    pub owner_id: String,
}

impl Figure {
    pub fn new(kind: FigureKind, start: Point, end: Point, color: BoardColor, brush_size: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            start,
            end,
            color,
            brush_size,
            owner_id: String::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Axis-aligned rectangle spanned by the drag points.
    pub fn frame(&self) -> Rect {
        Rect::from_points(self.start, self.end)
    }

    /// Whether the drag was too small to produce a visible figure.
    pub fn is_degenerate(&self) -> bool {
        match self.kind {
            FigureKind::Rectangle | FigureKind::Ellipse => {
                let f = self.frame();
                f.width() < 1.0 || f.height() < 1.0
            }
            FigureKind::Line | FigureKind::Arrow => self.start.distance(self.end) < 1.0,
        }
    }

    fn head_size(&self) -> f64 {
        (self.brush_size * ARROW_HEAD_FACTOR).max(MIN_ARROW_HEAD)
    }

    /// The two arrowhead barb endpoints.
    fn arrow_barbs(&self) -> (Point, Point) {
        let dir = self.end - self.start;
        let len = dir.hypot();
        let unit = if len > f64::EPSILON { dir / len } else { Vec2::new(1.0, 0.0) };
        let head = self.head_size();
        let back = self.end - unit * head;
        let perp = Vec2::new(-unit.y, unit.x) * (head * 0.5);
        (back + perp, back - perp)
    }

    /// Outline as a polyline (used for hit testing and vertex emission).
    pub fn outline(&self, tolerance: f64) -> Vec<Vec<Point>> {
        match self.kind {
            FigureKind::Line => vec![vec![self.start, self.end]],
            FigureKind::Arrow => {
                let (left, right) = self.arrow_barbs();
                vec![vec![self.start, self.end], vec![left, self.end, right]]
            }
            FigureKind::Rectangle | FigureKind::Ellipse => {
                let mut polylines = Vec::new();
                let mut current = Vec::new();
                let path = self.to_path();
                kurbo::flatten(path.iter(), tolerance, |el| match el {
                    kurbo::PathEl::MoveTo(p) => {
                        if current.len() > 1 {
                            polylines.push(std::mem::take(&mut current));
                        }
                        current.clear();
                        current.push(p);
                    }
                    kurbo::PathEl::LineTo(p) => current.push(p),
                    kurbo::PathEl::ClosePath => {
                        if let Some(first) = current.first().copied() {
                            current.push(first);
                        }
                    }
                    _ => {}
                });
                if current.len() > 1 {
                    polylines.push(current);
                }
                polylines
            }
        }
    }
}

impl Drawable for Figure {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn bounds(&self) -> Rect {
        let mut rect = self.frame();
        if self.kind == FigureKind::Arrow {
            let (left, right) = self.arrow_barbs();
            rect = rect.union_pt(left).union_pt(right);
        }
        let r = self.brush_size / 2.0;
        rect.inflate(r, r)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let reach = tolerance + self.brush_size / 2.0;
        match self.kind {
            FigureKind::Line => point_to_segment_dist(point, self.start, self.end) <= reach,
            FigureKind::Arrow => self
                .outline(0.25)
                .iter()
                .any(|poly| point_to_polyline_dist(point, poly) <= reach),
            FigureKind::Rectangle => {
                let f = self.frame();
                let corners = [
                    Point::new(f.x0, f.y0),
                    Point::new(f.x1, f.y0),
                    Point::new(f.x1, f.y1),
                    Point::new(f.x0, f.y1),
                    Point::new(f.x0, f.y0),
                ];
                point_to_polyline_dist(point, &corners) <= reach
            }
            FigureKind::Ellipse => {
                let f = self.frame();
                let (rx, ry) = (f.width() / 2.0, f.height() / 2.0);
                if rx < f64::EPSILON || ry < f64::EPSILON {
                    return point_to_segment_dist(point, self.start, self.end) <= reach;
                }
                let c = f.center();
                let nx = (point.x - c.x) / rx;
                let ny = (point.y - c.y) / ry;
                let normalized = (nx * nx + ny * ny).sqrt();
                ((normalized - 1.0) * rx.min(ry)).abs() <= reach
            }
        }
    }

    fn to_path(&self) -> BezPath {
        match self.kind {
            FigureKind::Rectangle => self.frame().to_path(0.1),
            FigureKind::Ellipse => Ellipse::from_rect(self.frame()).to_path(0.1),
            FigureKind::Line => {
                let mut path = BezPath::new();
                path.move_to(self.start);
                path.line_to(self.end);
                path
            }
            FigureKind::Arrow => {
                let (left, right) = self.arrow_barbs();
                let mut path = BezPath::new();
                path.move_to(self.start);
                path.line_to(self.end);
                path.move_to(left);
                path.line_to(self.end);
                path.line_to(right);
                path
            }
        }
    }
}

//! Freehand strokes built from start/draw/end operations.

use super::{BoardColor, Drawable, ObjectId, point_to_polyline_dist, points_bounds};
use kurbo::{BezPath, Point, Rect};
use std::cell::Cell;

/// A freehand stroke: an ordered point sequence with a brush.
#[derive(Debug, Clone)]
pub struct Stroke {
    id: ObjectId,
    /// Points in drawing order.
    points: Vec<Point>,
    pub color: BoardColor,
    /// Brush diameter in world units.
    pub brush_size: f64,
    /// User that drew the stroke.
    pub owner_id: String,
    /// Lazily computed bounds, cleared on every mutation.
    bounds_cache: Cell<Option<Rect>>,
}

impl Stroke {
    /// Create an empty stroke.
    pub fn new(id: ObjectId, color: BoardColor, brush_size: f64, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            points: Vec::new(),
            color,
            brush_size,
            owner_id: owner_id.into(),
            bounds_cache: Cell::new(None),
        }
    }

    /// Create from an existing point list.
    pub fn from_points(
        id: ObjectId,
        points: Vec<Point>,
        color: BoardColor,
        brush_size: f64,
        owner_id: impl Into<String>,
    ) -> Self {
        let mut stroke = Self::new(id, color, brush_size, owner_id);
        stroke.points = points;
        stroke
    }

    /// Append a point. Amortized O(1).
    pub fn push_point(&mut self, point: Point) {
        self.points.push(point);
        self.bounds_cache.set(None);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn last_point(&self) -> Option<Point> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// A stroke is only drawn once it has a segment.
    pub fn is_renderable(&self) -> bool {
        self.points.len() >= 2
    }

    /// Half the brush size.
    pub fn radius(&self) -> f64 {
        self.brush_size / 2.0
    }

    /// Simplify the path by removing redundant points.
    pub fn simplify(&mut self, tolerance: f64) {
        if self.points.len() < 3 {
            return;
        }
        self.points = rdp_simplify(&self.points, tolerance);
        self.bounds_cache.set(None);
    }

    /// Whether the cached bounds are currently valid (for tests and stats).
    pub fn has_cached_bounds(&self) -> bool {
        self.bounds_cache.get().is_some()
    }
}

impl PartialEq for Stroke {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.points == other.points
            && self.color == other.color
            && self.brush_size == other.brush_size
            && self.owner_id == other.owner_id
    }
}

/// Ramer-Douglas-Peucker line simplification.
fn rdp_simplify(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];

    let mut max_dist = 0.0;
    let mut max_index = 0;

    for (i, point) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perpendicular_distance(*point, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_index = i;
        }
    }

    if max_dist > tolerance {
        let mut left = rdp_simplify(&points[..=max_index], tolerance);
        let right = rdp_simplify(&points[max_index..], tolerance);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

fn perpendicular_distance(point: Point, line_start: Point, line_end: Point) -> f64 {
    let dx = line_end.x - line_start.x;
    let dy = line_end.y - line_start.y;

    let line_len_sq = dx * dx + dy * dy;
    if line_len_sq < f64::EPSILON {
        return point.distance(line_start);
    }

    let area2 = ((point.x - line_start.x) * dy - (point.y - line_start.y) * dx).abs();
    area2 / line_len_sq.sqrt()
}

impl Drawable for Stroke {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn bounds(&self) -> Rect {
        if let Some(cached) = self.bounds_cache.get() {
            return cached;
        }
        let Some(raw) = points_bounds(&self.points) else {
            return Rect::ZERO;
        };
        let r = self.radius();
        let bounds = raw.inflate(r, r);
        self.bounds_cache.set(Some(bounds));
        bounds
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_polyline_dist(point, &self.points) <= tolerance + self.radius()
    }

    fn to_path(&self) -> BezPath {
        let mut path = BezPath::new();
        let Some(first) = self.points.first() else {
            return path;
        };
        path.move_to(*first);
        for point in &self.points[1..] {
            path.line_to(*point);
        }
        path
    }
}

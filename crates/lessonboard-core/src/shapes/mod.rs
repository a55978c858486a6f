//! Scene object definitions for the shared board.

mod figure;
mod image;
mod stroke;
mod text;

pub use figure::{Figure, FigureKind};
pub use image::ImageObject;
pub use stroke::Stroke;
pub use text::TextBox;

use kurbo::{BezPath, Point, Rect};
use peniko::Color;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for scene objects.
pub type ObjectId = Uuid;

/// Namespace used to derive stable stroke identifiers.
const STROKE_NAMESPACE: Uuid = Uuid::from_u128(0x6c65_7373_6f6e_626f_6172_6473_7472_6f6b);

/// Derive the identifier of a stroke from its origin and starting sequence.
///
/// Replaying the same log always yields the same ids, which is what makes
/// replay idempotent at the object level.
pub fn stroke_id(origin_key: &str, start_sequence: u64) -> ObjectId {
    let name = format!("{origin_key}:{start_sequence}");
    Uuid::new_v5(&STROKE_NAMESPACE, name.as_bytes())
}

/// RGBA8 color, carried on the wire as a CSS hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoardColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl BoardColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub const fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(input: &str) -> Option<Self> {
        let hex = input.trim().strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let expand = |i: usize| channel(&hex[i..=i]).map(|v| v * 17);
                Some(Self::new(expand(0)?, expand(1)?, expand(2)?, 255))
            }
            6 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                255,
            )),
            8 => Some(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
                channel(&hex[6..8])?,
            )),
            _ => None,
        }
    }

    /// Parse a hex color, falling back to black.
    pub fn from_hex_or_black(input: &str) -> Self {
        Self::from_hex(input).unwrap_or_else(|| {
            log::warn!("unparseable color {input:?}, using black");
            Self::black()
        })
    }

    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }

    /// Same color with its alpha replaced.
    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Normalized RGBA, as GPU pipelines expect it.
    pub fn to_f32(&self) -> [f32; 4] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
            f32::from(self.a) / 255.0,
        ]
    }
}

impl Default for BoardColor {
    fn default() -> Self {
        Self::black()
    }
}

impl TryFrom<String> for BoardColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid color: {value}"))
    }
}

impl From<BoardColor> for String {
    fn from(color: BoardColor) -> Self {
        color.to_hex()
    }
}

impl From<BoardColor> for Color {
    fn from(color: BoardColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Owning-type tag of a scene object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Stroke,
    Figure,
    Text,
    Image,
}

/// Distance from a point to a line segment (a→b).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = kurbo::Vec2::new(b.x - a.x, b.y - a.y);
    let pv = kurbo::Vec2::new(point.x - a.x, point.y - a.y);
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * seg.x, a.y + t * seg.y);
    point.distance(proj)
}

/// Minimum distance from a point to a polyline.
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [only] => point.distance(*only),
        _ => points
            .windows(2)
            .map(|w| point_to_segment_dist(point, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Bounding box of a point set, or `None` when empty.
pub fn points_bounds(points: &[Point]) -> Option<Rect> {
    let first = points.first()?;
    let mut rect = Rect::from_points(*first, *first);
    for p in &points[1..] {
        rect = rect.union_pt(*p);
    }
    Some(rect)
}

/// Common behavior of every drawable scene object.
pub trait Drawable {
    /// Get the unique identifier.
    fn id(&self) -> ObjectId;

    /// Bounding box in world coordinates, including stroke width.
    fn bounds(&self) -> Rect;

    /// Check if a world point hits this object.
    fn hit_test(&self, point: Point, tolerance: f64) -> bool;

    /// Path representation for path-based rendering.
    fn to_path(&self) -> BezPath;
}

/// Every object that can live in the scene.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneObject {
    Stroke(Stroke),
    Figure(Figure),
    Text(TextBox),
    Image(ImageObject),
}

impl SceneObject {
    pub fn kind(&self) -> ObjectKind {
        match self {
            SceneObject::Stroke(_) => ObjectKind::Stroke,
            SceneObject::Figure(_) => ObjectKind::Figure,
            SceneObject::Text(_) => ObjectKind::Text,
            SceneObject::Image(_) => ObjectKind::Image,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.as_drawable().id()
    }

    pub fn bounds(&self) -> Rect {
        self.as_drawable().bounds()
    }

    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.as_drawable().hit_test(point, tolerance)
    }

    pub fn to_path(&self) -> BezPath {
        self.as_drawable().to_path()
    }

    /// Whether the renderer should draw this object at all.
    pub fn is_renderable(&self) -> bool {
        match self {
            SceneObject::Stroke(s) => s.is_renderable(),
            _ => true,
        }
    }

    pub fn as_stroke(&self) -> Option<&Stroke> {
        match self {
            SceneObject::Stroke(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_stroke_mut(&mut self) -> Option<&mut Stroke> {
        match self {
            SceneObject::Stroke(s) => Some(s),
            _ => None,
        }
    }

    fn as_drawable(&self) -> &dyn Drawable {
        match self {
            SceneObject::Stroke(s) => s,
            SceneObject::Figure(f) => f,
            SceneObject::Text(t) => t,
            SceneObject::Image(i) => i,
        }
    }
}

/// Serializable description of a non-stroke object, carried by
/// `complete-drawing` messages so figures, text and images replicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectSpec {
    Figure(Figure),
    Text(TextBox),
    Image(ImageObject),
}

impl ObjectSpec {
    pub fn id(&self) -> ObjectId {
        match self {
            ObjectSpec::Figure(f) => f.id(),
            ObjectSpec::Text(t) => t.id(),
            ObjectSpec::Image(i) => i.id(),
        }
    }

    /// Anchor points that must lie on the canvas.
    pub fn anchor_points(&self) -> Vec<Point> {
        match self {
            ObjectSpec::Figure(f) => vec![f.start, f.end],
            ObjectSpec::Text(t) => vec![t.position],
            ObjectSpec::Image(i) => vec![i.position],
        }
    }

    pub fn into_object(self) -> SceneObject {
        match self {
            ObjectSpec::Figure(f) => SceneObject::Figure(f),
            ObjectSpec::Text(t) => SceneObject::Text(t),
            ObjectSpec::Image(i) => SceneObject::Image(i),
        }
    }

    /// Shift every anchor by `delta`, used by merge nudging.
    pub fn translate(&mut self, delta: kurbo::Vec2) {
        match self {
            ObjectSpec::Figure(f) => {
                f.start += delta;
                f.end += delta;
            }
            ObjectSpec::Text(t) => t.position += delta,
            ObjectSpec::Image(i) => i.position += delta,
        }
    }
}

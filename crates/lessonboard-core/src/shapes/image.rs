//! Raster images placed on the board.

use super::{Drawable, ObjectId};
use kurbo::{BezPath, Point, Rect, Shape as KurboShape};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An image placed by reference; pixel data lives with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageObject {
    pub(crate) id: ObjectId,
    /// Top-left corner position.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    /// URL or content key of the image.
    pub source: String,
    #[serde(default)]
    pub owner_id: String,
}

impl ImageObject {
    pub fn new(position: Point, width: f64, height: f64, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            width: width.max(1.0),
            height: height.max(1.0),
            source: source.into(),
            owner_id: String::new(),
        }
    }

    /// Detect the MIME type from the source's extension.
    pub fn mime_type(&self) -> Option<&'static str> {
        let ext = self.source.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "webp" => Some("image/webp"),
            "gif" => Some("image/gif"),
            _ => None,
        }
    }
}

impl Drawable for ImageObject {
    fn id(&self) -> ObjectId {
        self.id
    }

    fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.position, (self.width, self.height))
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
    fn test_image_bounds_and_mime() {
        let img = ImageObject::new(Point::new(10.0, 20.0), 100.0, 50.0, "https://cdn/x/diagram.PNG");
        assert_eq!(img.bounds(), Rect::new(10.0, 20.0, 110.0, 70.0));
        assert_eq!(img.mime_type(), Some("image/png"));
    }
}

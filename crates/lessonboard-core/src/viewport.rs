//! Viewport culling: which objects intersect the visible area.

use crate::camera::Camera;
use crate::dirty::rects_overlap;
use crate::shapes::ObjectId;
use kurbo::{Rect, Size};
use std::collections::HashSet;

/// Camera state the visible set was computed for.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CullKey {
    coeffs: [f64; 6],
    viewport: Size,
}

/// Caches the set of objects whose bounds intersect the world-space
/// viewport expanded by a margin.
///
/// The set is only recomputed when the transform or viewport size
/// changes. Between recomputes it is kept current incrementally through
/// [`note_object`](Self::note_object) and [`forget`](Self::forget).
#[derive(Debug, Clone)]
pub struct ViewportCuller {
    margin: f64,
    key: Option<CullKey>,
    visible_rect: Rect,
    visible: HashSet<ObjectId>,
    recomputes: u64,
}

impl ViewportCuller {
    pub fn new(margin: f64) -> Self {
        Self {
            margin,
            key: None,
            visible_rect: Rect::ZERO,
            visible: HashSet::new(),
            recomputes: 0,
        }
    }

    /// Whether the cached set is stale for this camera.
    pub fn needs_recompute(&self, camera: &Camera, viewport: Size) -> bool {
        let key = CullKey {
            coeffs: camera.transform().as_coeffs(),
            viewport,
        };
        self.key != Some(key)
    }

    /// Recompute the visible set if the transform changed. Returns whether
    /// a recompute happened.
    pub fn update<I>(&mut self, camera: &Camera, viewport: Size, objects: I) -> bool
    where
        I: IntoIterator<Item = (ObjectId, Rect)>,
    {
        if !self.needs_recompute(camera, viewport) {
            return false;
        }
        self.key = Some(CullKey {
            coeffs: camera.transform().as_coeffs(),
            viewport,
        });
        self.visible_rect = camera
            .visible_world_rect(viewport)
            .inflate(self.margin, self.margin);
        self.visible = objects
            .into_iter()
            .filter(|(_, bounds)| rects_overlap(self.visible_rect, *bounds))
            .map(|(id, _)| id)
            .collect();
        self.recomputes += 1;
        log::debug!(
            "viewport culled to {} objects in {:?}",
            self.visible.len(),
            self.visible_rect
        );
        true
    }

    /// Force a recompute on the next [`update`](Self::update).
    pub fn invalidate(&mut self) {
        self.key = None;
    }

    /// Track an object created or changed since the last recompute.
    pub fn note_object(&mut self, id: ObjectId, bounds: Rect) {
        if self.key.is_none() {
            return;
        }
        if rects_overlap(self.visible_rect, bounds) {
            self.visible.insert(id);
        } else {
            self.visible.remove(&id);
        }
    }

    pub fn forget(&mut self, id: &ObjectId) {
        self.visible.remove(id);
    }

    pub fn clear(&mut self) {
        self.visible.clear();
    }

    pub fn is_visible(&self, id: &ObjectId) -> bool {
        self.visible.contains(id)
    }

    /// Whether a rectangle touches the culled area.
    pub fn intersects(&self, bounds: Rect) -> bool {
        rects_overlap(self.visible_rect, bounds)
    }

    pub fn visible_rect(&self) -> Rect {
        self.visible_rect
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// Number of full recomputes so far.
    pub fn recomputes(&self) -> u64 {
        self.recomputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::{Point, Vec2};
    use uuid::Uuid;

    fn objects() -> Vec<(ObjectId, Rect)> {
        vec![
            (Uuid::from_u128(1), Rect::new(10.0, 10.0, 20.0, 20.0)),
            (Uuid::from_u128(2), Rect::new(850.0, 10.0, 860.0, 20.0)),
            (Uuid::from_u128(3), Rect::new(5000.0, 5000.0, 5010.0, 5010.0)),
        ]
    }

    #[test]
    fn test_margin_includes_near_objects() {
        let mut culler = ViewportCuller::new(100.0);
        culler.update(&Camera::new(), Size::new(800.0, 600.0), objects());
        assert!(culler.is_visible(&Uuid::from_u128(1)));
        assert!(culler.is_visible(&Uuid::from_u128(2)));
        assert!(!culler.is_visible(&Uuid::from_u128(3)));
    }

    #[test]
    fn test_recompute_only_on_transform_change() {
        let mut culler = ViewportCuller::new(100.0);
        let mut camera = Camera::new();
        let viewport = Size::new(800.0, 600.0);
        assert!(culler.update(&camera, viewport, objects()));
        assert!(!culler.update(&camera, viewport, objects()));
        camera.pan(Vec2::new(-4950.0, -4950.0));
        assert!(culler.update(&camera, viewport, objects()));
        assert!(culler.is_visible(&Uuid::from_u128(3)));
        assert!(!culler.is_visible(&Uuid::from_u128(1)));
        assert_eq!(culler.recomputes(), 2);
    }

    #[test]
    fn test_incremental_note() {
        let mut culler = ViewportCuller::new(0.0);
        culler.update(&Camera::new(), Size::new(100.0, 100.0), Vec::new());
        let id = Uuid::from_u128(9);
        culler.note_object(id, Rect::from_points(Point::new(5.0, 5.0), Point::new(6.0, 6.0)));
        assert!(culler.is_visible(&id));
        culler.note_object(id, Rect::new(500.0, 500.0, 510.0, 510.0));
        assert!(!culler.is_visible(&id));
    }
}

//! The authoritative in-memory board: scene objects keyed by id.

use crate::operation::{Operation, OperationKind};
use crate::shapes::{Drawable, ObjectId, SceneObject, Stroke, stroke_id};
use kurbo::{Point, Rect};
use std::collections::HashMap;

/// What an operation changed, for invalidation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneChange {
    /// Areas whose pixels may differ.
    pub dirty: Vec<Rect>,
    /// Everything must be redrawn.
    pub full: bool,
    /// Objects created or modified.
    pub touched: Vec<ObjectId>,
    pub removed: Vec<ObjectId>,
}

impl SceneChange {
    pub fn full() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.dirty.is_empty() && self.touched.is_empty() && self.removed.is_empty()
    }

    pub fn touch(&mut self, id: ObjectId, bounds: Rect) {
        self.touched.push(id);
        self.dirty.push(bounds);
    }

    pub fn remove(&mut self, id: ObjectId, bounds: Rect) {
        self.removed.push(id);
        self.dirty.push(bounds);
    }

    pub fn merge(&mut self, other: SceneChange) {
        self.dirty.extend(other.dirty);
        self.full |= other.full;
        self.touched.extend(other.touched);
        self.removed.extend(other.removed);
    }
}

/// Objects in z-order plus the strokes currently being drawn.
///
/// Rebuilding from an ordered log always yields the same object set:
/// stroke ids derive from the origin and the starting sequence, and
/// completed objects carry their own id.
#[derive(Debug, Clone)]
pub struct SceneStore {
    objects: HashMap<ObjectId, SceneObject>,
    /// Insertion order, bottom first.
    z_order: Vec<ObjectId>,
    /// In-progress stroke per origin key.
    active_strokes: HashMap<String, ObjectId>,
    revision: u64,
    extent: f64,
}

impl SceneStore {
    pub fn new(extent: f64) -> Self {
        Self {
            objects: HashMap::new(),
            z_order: Vec::new(),
            active_strokes: HashMap::new(),
            revision: 0,
            extent,
        }
    }

    /// Full canvas rectangle.
    pub fn canvas_rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.extent, self.extent)
    }

    pub fn extent(&self) -> f64 {
        self.extent
    }

    /// Apply one operation. The caller has already validated and ordered it.
    pub fn apply_operation(&mut self, op: &Operation) -> SceneChange {
        let key = op.origin.stroke_key().to_string();
        let change = match op.kind {
            OperationKind::Start => match op.point {
                Some(point) => self.start_stroke(key, op, point),
                None => SceneChange::default(),
            },
            OperationKind::Draw => match op.point {
                Some(point) => self.extend_stroke(key, op, point),
                None => SceneChange::default(),
            },
            OperationKind::End => self.end_stroke(&key),
            OperationKind::Clear => self.clear(),
            OperationKind::Erase => match op.point {
                Some(point) => self.erase_at(point, op.brush_radius()),
                None => SceneChange::default(),
            },
            OperationKind::CompleteStroke => self.complete(key, op),
        };
        if !change.is_empty() {
            self.revision += 1;
        }
        log::trace!("applied {} #{} -> revision {}", op.kind, op.sequence_number, self.revision);
        change
    }

    fn start_stroke(&mut self, key: String, op: &Operation, point: Point) -> SceneChange {
        let mut change = self.end_stroke(&key);
        let id = stroke_id(&key, op.stroke_sequence());
        let mut stroke = Stroke::new(id, op.color, op.brush_size, op.origin.user_id.clone());
        stroke.push_point(point);
        change.merge(self.insert(SceneObject::Stroke(stroke)));
        self.active_strokes.insert(key, id);
        change
    }

    fn extend_stroke(&mut self, key: String, op: &Operation, point: Point) -> SceneChange {
        let active = self
            .active_strokes
            .get(&key)
            .copied()
            .filter(|id| self.objects.get(id).is_some_and(|obj| obj.as_stroke().is_some()));
        let Some(id) = active else {
            // A draw without a live start begins its own stroke.
            return self.start_stroke(key, op, point);
        };
        let mut change = SceneChange::default();
        if let Some(stroke) = self.objects.get_mut(&id).and_then(SceneObject::as_stroke_mut) {
            stroke.push_point(point);
            change.touch(id, stroke.bounds());
        }
        change
    }

    fn end_stroke(&mut self, key: &str) -> SceneChange {
        let mut change = SceneChange::default();
        let Some(id) = self.active_strokes.remove(key) else {
            return change;
        };
        let degenerate = self
            .objects
            .get(&id)
            .and_then(SceneObject::as_stroke)
            .is_some_and(|s| !s.is_renderable());
        if degenerate {
            if let Some(obj) = self.remove(&id) {
                change.remove(id, obj.bounds());
            }
        }
        change
    }

    fn erase_at(&mut self, point: Point, radius: f64) -> SceneChange {
        let mut change = SceneChange::default();
        for id in self.objects_near(point, radius) {
            if let Some(obj) = self.remove(&id) {
                change.remove(id, obj.bounds());
            }
        }
        change
    }

    fn complete(&mut self, key: String, op: &Operation) -> SceneChange {
        let object = match &op.object {
            Some(spec) => spec.clone().into_object(),
            None => {
                let id = stroke_id(&key, op.stroke_sequence());
                SceneObject::Stroke(Stroke::from_points(
                    id,
                    op.points.clone(),
                    op.color,
                    op.brush_size,
                    op.origin.user_id.clone(),
                ))
            }
        };
        self.add_object(object)
    }

    /// Insert a fully formed object, replacing any object with the same id.
    pub fn add_object(&mut self, object: SceneObject) -> SceneChange {
        let change = self.insert(object);
        self.revision += 1;
        change
    }

    fn insert(&mut self, object: SceneObject) -> SceneChange {
        let mut change = SceneChange::default();
        let id = object.id();
        let bounds = object.bounds();
        match self.objects.insert(id, object) {
            Some(previous) => change.dirty.push(previous.bounds()),
            None => self.z_order.push(id),
        }
        change.touch(id, bounds);
        change
    }

    /// Remove an object, returning it.
    pub fn remove(&mut self, id: &ObjectId) -> Option<SceneObject> {
        let object = self.objects.remove(id)?;
        self.z_order.retain(|z| z != id);
        self.active_strokes.retain(|_, active| active != id);
        self.revision += 1;
        Some(object)
    }

    /// Empty the board; the whole canvas becomes dirty.
    pub fn clear(&mut self) -> SceneChange {
        let mut change = SceneChange::full();
        change.removed = std::mem::take(&mut self.z_order);
        self.objects.clear();
        self.active_strokes.clear();
        self.revision += 1;
        change
    }

    /// Replay an ordered log into an empty store.
    pub fn rebuild<'a, I>(&mut self, operations: I) -> SceneChange
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        let mut change = self.clear();
        for op in operations {
            change.merge(self.apply_operation(op));
        }
        change
    }

    pub fn get(&self, id: &ObjectId) -> Option<&SceneObject> {
        self.objects.get(id)
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Objects bottom to top.
    pub fn iter(&self) -> impl Iterator<Item = &SceneObject> {
        self.z_order.iter().filter_map(|id| self.objects.get(id))
    }

    pub fn ids(&self) -> &[ObjectId] {
        &self.z_order
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Stroke an origin is currently drawing.
    pub fn active_stroke(&self, origin_key: &str) -> Option<&Stroke> {
        let id = self.active_strokes.get(origin_key)?;
        self.objects.get(id).and_then(SceneObject::as_stroke)
    }

    /// Ids of every object within `radius` of `point`, bottom to top.
    pub fn objects_near(&self, point: Point, radius: f64) -> Vec<ObjectId> {
        self.iter()
            .filter(|obj| obj.hit_test(point, radius))
            .map(SceneObject::id)
            .collect()
    }

    /// Topmost object under `point`.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> Option<ObjectId> {
        self.z_order
            .iter()
            .rev()
            .find(|id| self.objects.get(id).is_some_and(|obj| obj.hit_test(point, tolerance)))
            .copied()
    }

    /// Union of every object's bounds.
    pub fn bounds(&self) -> Option<Rect> {
        self.iter().map(SceneObject::bounds).reduce(|acc, b| acc.union(b))
    }

    /// Increases on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CANVAS_EXTENT, Origin};
    use crate::shapes::{BoardColor, Figure, FigureKind, ObjectSpec};

    fn origin(client: &str) -> Origin {
        Origin::new(client, format!("user-{client}"), "Name")
    }

    fn red() -> BoardColor {
        BoardColor::from_hex("#ff0000").unwrap_or_default()
    }

    fn stroke_ops(client: &str, first_seq: u64) -> Vec<Operation> {
        vec![
            Operation::start(Point::new(10.0, 10.0))
                .with_style(red(), 3.0)
                .with_origin(origin(client))
                .with_sequence(first_seq),
            Operation::draw(Point::new(20.0, 20.0))
                .with_style(red(), 3.0)
                .with_origin(origin(client))
                .with_sequence(first_seq + 1),
            Operation::end().with_origin(origin(client)).with_sequence(first_seq + 2),
        ]
    }

    #[test]
    fn test_start_draw_end_builds_stroke() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        for op in stroke_ops("a", 1) {
            store.apply_operation(&op);
        }
        assert_eq!(store.len(), 1);
        let stroke = store.iter().next().and_then(SceneObject::as_stroke).unwrap();
        assert_eq!(stroke.points(), &[Point::new(10.0, 10.0), Point::new(20.0, 20.0)]);
        assert_eq!(stroke.color, red());
        assert!(store.active_stroke("a").is_none());
    }

    #[test]
    fn test_interleaved_origins() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        let a = stroke_ops("a", 1);
        let b = stroke_ops("b", 1);
        for (x, y) in a.iter().zip(b.iter()) {
            store.apply_operation(x);
            store.apply_operation(y);
        }
        assert_eq!(store.len(), 2);
        assert!(store.iter().all(|o| o.as_stroke().is_some_and(|s| s.len() == 2)));
    }

    #[test]
    fn test_lone_start_dropped_at_end() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        store.apply_operation(&Operation::start(Point::new(5.0, 5.0)).with_origin(origin("a")).with_sequence(1));
        assert_eq!(store.len(), 1);
        assert!(!store.iter().next().unwrap().is_renderable());
        let change = store.apply_operation(&Operation::end().with_origin(origin("a")).with_sequence(2));
        assert!(store.is_empty());
        assert_eq!(change.removed.len(), 1);
    }

    #[test]
    fn test_draw_without_start_starts_stroke() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        store.apply_operation(&Operation::draw(Point::new(5.0, 5.0)).with_origin(origin("a")).with_sequence(4));
        store.apply_operation(&Operation::draw(Point::new(6.0, 6.0)).with_origin(origin("a")).with_sequence(5));
        assert_eq!(store.active_stroke("a").map(Stroke::len), Some(2));
    }

    #[test]
    fn test_dirty_covers_changed_bounds() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        let ops = stroke_ops("a", 1);
        store.apply_operation(&ops[0]);
        let change = store.apply_operation(&ops[1]);
        let bounds = store.iter().next().unwrap().bounds();
        assert!(change.dirty.iter().any(|r| crate::dirty::rect_contains(*r, bounds)));
    }

    #[test]
    fn test_clear_is_full() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        for op in stroke_ops("a", 1) {
            store.apply_operation(&op);
        }
        let change = store.apply_operation(&Operation::clear().with_sequence(9));
        assert!(change.full);
        assert!(store.is_empty());
    }

    #[test]
    fn test_erase_removes_hit_objects() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        for op in stroke_ops("a", 1) {
            store.apply_operation(&op);
        }
        let miss = Operation::erase(Point::new(500.0, 500.0)).with_style(BoardColor::black(), 10.0);
        assert!(store.apply_operation(&miss).removed.is_empty());
        let hit = Operation::erase(Point::new(15.0, 15.0)).with_style(BoardColor::black(), 10.0);
        assert_eq!(store.apply_operation(&hit).removed.len(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_complete_stroke_idempotent() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        let op = Operation::complete_stroke(vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)])
            .with_origin(origin("a"))
            .with_sequence(3);
        store.apply_operation(&op);
        store.apply_operation(&op);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_complete_object_and_hit_test() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        let figure = Figure::new(FigureKind::Line, Point::new(0.0, 0.0), Point::new(100.0, 0.0), BoardColor::black(), 2.0);
        let id = figure.id;
        store.apply_operation(&Operation::complete_object(ObjectSpec::Figure(figure)).with_sequence(1));
        assert_eq!(store.hit_test(Point::new(50.0, 1.0), 1.0), Some(id));
        assert_eq!(store.hit_test(Point::new(50.0, 50.0), 1.0), None);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut ops = stroke_ops("a", 1);
        ops.extend(stroke_ops("b", 4));
        let mut first = SceneStore::new(CANVAS_EXTENT);
        first.rebuild(&ops);
        let mut second = SceneStore::new(CANVAS_EXTENT);
        second.rebuild(&ops);
        second.rebuild(&ops);
        assert_eq!(first.ids(), second.ids());
        assert_eq!(first.iter().collect::<Vec<_>>(), second.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_revision_increases() {
        let mut store = SceneStore::new(CANVAS_EXTENT);
        let before = store.revision();
        store.apply_operation(&stroke_ops("a", 1)[0]);
        assert!(store.revision() > before);
    }
}

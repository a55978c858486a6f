//! Optimistic local application on top of the confirmed scene.
//!
//! Local operations are journaled and applied to a shadow store as soon as
//! they are generated. The confirmed [`SceneStore`] only ever receives
//! operations in server order. A [`SceneView`] composes both for rendering
//! and hit testing. Entries leave the journal once every operation of
//! their stroke has been echoed back.

use crate::operation::{Operation, OperationKind};
use crate::scene::{SceneChange, SceneStore};
use crate::shapes::{ObjectId, SceneObject};
use kurbo::{Point, Rect};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct JournalEntry {
    op: Operation,
    /// Client sequence of the first operation of this entry's stroke.
    group: u64,
    confirmed: bool,
}

#[derive(Debug, Clone)]
pub struct PredictiveApplier {
    journal: Vec<JournalEntry>,
    shadow: SceneStore,
    /// Confirmed objects a pending erase or clear has taken off screen,
    /// keyed by the client sequence of that operation.
    hidden: HashMap<u64, Vec<ObjectId>>,
    /// Stroke currently being drawn locally.
    open_group: Option<u64>,
}

impl PredictiveApplier {
    pub fn new(extent: f64) -> Self {
        Self {
            journal: Vec::new(),
            shadow: SceneStore::new(extent),
            hidden: HashMap::new(),
            open_group: None,
        }
    }

    /// Apply a sequenced local operation to the shadow.
    pub fn apply_local(&mut self, op: Operation, confirmed: &SceneStore) -> SceneChange {
        let seq = op.client_sequence;
        let group = match op.kind {
            OperationKind::Start => {
                self.open_group = Some(seq);
                seq
            }
            OperationKind::Draw => *self.open_group.get_or_insert(seq),
            OperationKind::End => self.open_group.take().unwrap_or(seq),
            _ => seq,
        };

        let mut change = SceneChange::default();
        match op.kind {
            OperationKind::Erase => {
                if let Some(point) = op.point {
                    let ids: Vec<ObjectId> = confirmed
                        .objects_near(point, op.brush_radius())
                        .into_iter()
                        .filter(|id| !self.is_hidden(id))
                        .collect();
                    for id in &ids {
                        if let Some(obj) = confirmed.get(id) {
                            change.remove(*id, obj.bounds());
                        }
                    }
                    self.hidden.insert(seq, ids);
                }
            }
            OperationKind::Clear => {
                self.hidden.insert(seq, confirmed.ids().to_vec());
                change.full = true;
            }
            _ => {}
        }
        change.merge(self.shadow.apply_operation(&op));
        self.journal.push(JournalEntry {
            op,
            group,
            confirmed: false,
        });
        change
    }

    /// Mark a local operation as echoed by the server. Returns `None` for
    /// sequences this applier does not know.
    pub fn confirm(&mut self, client_sequence: u64) -> Option<SceneChange> {
        let entry = self
            .journal
            .iter_mut()
            .find(|e| e.op.client_sequence == client_sequence && !e.confirmed)?;
        entry.confirmed = true;
        self.hidden.remove(&client_sequence);
        Some(self.prune())
    }

    /// Withdraw an unconfirmed operation (conflict loser or discarded send).
    pub fn cancel(&mut self, client_sequence: u64, confirmed: &SceneStore) -> SceneChange {
        let before = self.journal.len();
        self.journal
            .retain(|e| e.confirmed || e.op.client_sequence != client_sequence);
        if self.journal.len() == before {
            return SceneChange::default();
        }
        let mut change = self.unhide(client_sequence, confirmed);
        change.merge(self.rebuild());
        change
    }

    /// Swap an unconfirmed operation for an adjusted copy.
    pub fn replace(&mut self, replacement: Operation) -> SceneChange {
        let seq = replacement.client_sequence;
        let Some(entry) = self
            .journal
            .iter_mut()
            .find(|e| e.op.client_sequence == seq && !e.confirmed)
        else {
            return SceneChange::default();
        };
        entry.op = replacement;
        self.rebuild()
    }

    /// Unconfirmed local operations in generation order.
    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.journal.iter().filter(|e| !e.confirmed).map(|e| &e.op)
    }

    pub fn pending_len(&self) -> usize {
        self.journal.iter().filter(|e| !e.confirmed).count()
    }

    pub fn is_hidden(&self, id: &ObjectId) -> bool {
        self.hidden.values().any(|ids| ids.contains(id))
    }

    pub fn shadow(&self) -> &SceneStore {
        &self.shadow
    }

    fn unhide(&mut self, client_sequence: u64, confirmed: &SceneStore) -> SceneChange {
        let mut change = SceneChange::default();
        for id in self.hidden.remove(&client_sequence).unwrap_or_default() {
            if let Some(obj) = confirmed.get(&id) {
                change.touch(id, obj.bounds());
            }
        }
        change
    }

    /// Drop strokes whose every operation is confirmed, then rebuild.
    fn prune(&mut self) -> SceneChange {
        let live: HashSet<u64> = self
            .journal
            .iter()
            .filter(|e| !e.confirmed || Some(e.group) == self.open_group)
            .map(|e| e.group)
            .collect();
        let before = self.journal.len();
        self.journal.retain(|e| live.contains(&e.group));
        if self.journal.len() == before {
            return SceneChange::default();
        }
        self.rebuild()
    }

    fn rebuild(&mut self) -> SceneChange {
        let mut next = SceneStore::new(self.shadow.extent());
        for entry in &self.journal {
            next.apply_operation(&entry.op);
        }
        let previous = std::mem::replace(&mut self.shadow, next);

        let mut change = SceneChange::default();
        for old in previous.iter() {
            match self.shadow.get(&old.id()) {
                Some(new) if new == old => {}
                Some(_) => change.dirty.push(old.bounds()),
                None => change.remove(old.id(), old.bounds()),
            }
        }
        for new in self.shadow.iter() {
            if previous.get(&new.id()) != Some(new) {
                change.touch(new.id(), new.bounds());
            }
        }
        change
    }
}

/// Confirmed scene with pending local edits layered on top.
#[derive(Clone, Copy)]
pub struct SceneView<'a> {
    confirmed: &'a SceneStore,
    predictive: &'a PredictiveApplier,
}

impl<'a> SceneView<'a> {
    pub fn new(confirmed: &'a SceneStore, predictive: &'a PredictiveApplier) -> Self {
        Self { confirmed, predictive }
    }

    fn shows_confirmed(&self, id: &ObjectId) -> bool {
        !self.predictive.shadow.contains(id) && !self.predictive.is_hidden(id)
    }

    /// Visible objects bottom to top; pending local objects draw last.
    pub fn iter(&self) -> impl Iterator<Item = &'a SceneObject> + use<'a> {
        let view = *self;
        let confirmed: &'a SceneStore = view.confirmed;
        let shadow: &'a SceneStore = &view.predictive.shadow;
        confirmed
            .iter()
            .filter(move |obj| view.shows_confirmed(&obj.id()))
            .chain(shadow.iter())
    }

    pub fn get(&self, id: &ObjectId) -> Option<&'a SceneObject> {
        if let Some(obj) = self.predictive.shadow.get(id) {
            return Some(obj);
        }
        self.confirmed.get(id).filter(|_| !self.predictive.is_hidden(id))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Topmost visible object under `point`.
    pub fn hit_test(&self, point: Point, tolerance: f64) -> Option<ObjectId> {
        self.iter()
            .filter(|obj| obj.hit_test(point, tolerance))
            .last()
            .map(SceneObject::id)
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.iter().map(SceneObject::bounds).reduce(|acc, b| acc.union(b))
    }

    pub fn confirmed(&self) -> &'a SceneStore {
        self.confirmed
    }
}

//! Sequence reconciliation: exactly-once, in-order application of
//! operations delivered at least once.

use crate::operation::Operation;
use crate::scene::SceneStore;

/// How a list of operations reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Realtime fan-out; gaps are detected.
    Push,
    /// Full log from `board_state` or the REST fallback.
    Snapshot,
}

/// Missing range in pushed sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub expected: u64,
    pub received: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    /// Operations at or below the applied marker.
    pub duplicates: usize,
    /// Pushed operations held back while a resync is pending.
    pub deferred: usize,
    pub gap: Option<SequenceGap>,
    /// The target was reset and rebuilt from the snapshot.
    pub rebuilt: bool,
}

/// Whatever reconciled operations are applied to.
pub trait ReconcileTarget {
    /// Drop all state before a full rebuild.
    fn reset(&mut self);
    fn apply(&mut self, op: &Operation);
}

impl ReconcileTarget for SceneStore {
    fn reset(&mut self) {
        self.clear();
    }

    fn apply(&mut self, op: &Operation) {
        self.apply_operation(op);
    }
}

#[derive(Debug, Clone)]
pub struct SequenceReconciler {
    last_applied: u64,
    gap_tolerance: u64,
    resync_pending: bool,
}

impl SequenceReconciler {
    pub fn new(gap_tolerance: u64) -> Self {
        Self {
            last_applied: 0,
            gap_tolerance,
            resync_pending: false,
        }
    }

    /// Highest sequence number applied so far.
    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    pub fn is_resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// Treat the next snapshot as a full rebuild.
    pub fn request_resync(&mut self) {
        self.resync_pending = true;
    }

    /// Sort, deduplicate and apply `operations` to `target`.
    pub fn reconcile<T: ReconcileTarget + ?Sized>(
        &mut self,
        mut operations: Vec<Operation>,
        delivery: Delivery,
        target: &mut T,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if delivery == Delivery::Push && self.resync_pending {
            report.deferred = operations.len();
            log::debug!("holding {} pushed operations until resync", operations.len());
            return report;
        }
        if delivery == Delivery::Snapshot && self.resync_pending {
            log::info!("rebuilding board from {} operations", operations.len());
            target.reset();
            self.last_applied = 0;
            self.resync_pending = false;
            report.rebuilt = true;
        }

        // Stable: equal sequence numbers keep arrival order.
        operations.sort_by_key(|op| op.sequence_number);

        for op in &operations {
            if op.sequence_number <= self.last_applied {
                report.duplicates += 1;
                continue;
            }
            if delivery == Delivery::Push {
                let expected = self.last_applied + 1;
                if op.sequence_number > expected + self.gap_tolerance {
                    log::warn!(
                        "sequence gap: expected {expected}, received {}; requesting resync",
                        op.sequence_number
                    );
                    report.gap = Some(SequenceGap {
                        expected,
                        received: op.sequence_number,
                    });
                    self.resync_pending = true;
                    break;
                }
            }
            target.apply(op);
            self.last_applied = op.sequence_number;
            report.applied += 1;
        }
        if report.duplicates > 0 {
            log::debug!("dropped {} already-applied operations", report.duplicates);
        }
        report
    }
}

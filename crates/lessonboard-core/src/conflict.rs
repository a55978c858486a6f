//! Resolution of concurrent overlapping edits from different origins.
//!
//! Only incoming `draw` operations are checked, and only against local
//! `draw` operations that have not been confirmed yet. Two such operations
//! overlap when their points are closer than the larger brush radius and
//! their timestamps lie within the configured window.

use crate::operation::{Operation, OperationKind};
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// The later-arriving operation wins; the local one is cancelled.
    LastWriterWins,
    /// The earlier timestamp wins; the loser is dropped.
    TimestampPriority,
    /// The higher role wins; ties fall back to timestamp priority.
    UserPriority,
    /// Keep both, nudging the later one so neither is hidden.
    #[default]
    IntelligentMerge,
}

impl ConflictStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastWriterWins => "last-writer-wins",
            Self::TimestampPriority => "timestamp-priority",
            Self::UserPriority => "user-priority",
            Self::IntelligentMerge => "intelligent-merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-writer-wins" => Ok(Self::LastWriterWins),
            "timestamp-priority" => Ok(Self::TimestampPriority),
            "user-priority" => Ok(Self::UserPriority),
            "intelligent-merge" => Ok(Self::IntelligentMerge),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

/// Lesson role of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Student,
    Support,
    Teacher,
    Admin,
}

impl Role {
    /// Numeric priority used by [`ConflictStrategy::UserPriority`].
    pub fn priority(self) -> u8 {
        match self {
            Role::Student => 1,
            Role::Support => 2,
            Role::Teacher => 3,
            Role::Admin => 4,
        }
    }

    /// Parse a role name, accepting common synonyms.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "student" | "learner" => Some(Role::Student),
            "support" | "observer" => Some(Role::Support),
            "teacher" | "tutor" | "instructor" => Some(Role::Teacher),
            "admin" | "administrator" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Roles of the participants seen so far, keyed by user id.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles: HashMap<String, Role>,
}

impl RoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, user_id: impl Into<String>, role: Role) {
        self.roles.insert(user_id.into(), role);
    }

    pub fn remove(&mut self, user_id: &str) {
        self.roles.remove(user_id);
    }

    /// Role of a user; unknown users rank as students.
    pub fn role_of(&self, user_id: &str) -> Role {
        self.roles.get(user_id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Which side of a merged pair gets nudged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeTarget {
    Incoming,
    Local,
}

/// Outcome of one incoming/local conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply the incoming operation, cancelling the local one if asked.
    ApplyIncoming { cancel_local: bool },
    /// The local operation wins; the incoming one is not applied.
    DropIncoming,
    /// Keep both; shift `target` by `delta`.
    Merge { target: MergeTarget, delta: Vec2 },
}

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    window_ms: u64,
    merge_offset: f64,
    extent: f64,
    resolved: u64,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy, window_ms: u64, merge_offset: f64, extent: f64) -> Self {
        Self {
            strategy,
            window_ms,
            merge_offset,
            extent,
            resolved: 0,
        }
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    pub fn set_strategy(&mut self, strategy: ConflictStrategy) {
        log::info!("conflict strategy set to {strategy}");
        self.strategy = strategy;
    }

    /// Conflicts resolved so far.
    pub fn resolved(&self) -> u64 {
        self.resolved
    }

    /// Whether two operations overlap in space and time.
    pub fn overlaps(&self, a: &Operation, b: &Operation) -> bool {
        if a.kind != OperationKind::Draw || b.kind != OperationKind::Draw {
            return false;
        }
        if a.origin.stroke_key() == b.origin.stroke_key() {
            return false;
        }
        let (Some(pa), Some(pb)) = (a.point, b.point) else {
            return false;
        };
        let reach = a.brush_radius().max(b.brush_radius());
        pa.distance(pb) < reach && a.timestamp.abs_diff(b.timestamp) < self.window_ms
    }

    /// Pending local operations the incoming one collides with, in the
    /// order they were generated.
    pub fn find_conflicts<'a, I>(&self, incoming: &Operation, pending: I) -> Vec<&'a Operation>
    where
        I: IntoIterator<Item = &'a Operation>,
    {
        if incoming.kind != OperationKind::Draw {
            return Vec::new();
        }
        pending
            .into_iter()
            .filter(|local| self.overlaps(incoming, local))
            .collect()
    }

    /// Resolve one pair. The result depends only on the two operations,
    /// the strategy and the roles, never on call order or wall time.
    pub fn resolve(&mut self, incoming: &Operation, local: &Operation, roles: &RoleDirectory) -> Resolution {
        let resolution = match self.strategy {
            ConflictStrategy::LastWriterWins => Resolution::ApplyIncoming { cancel_local: true },
            ConflictStrategy::TimestampPriority => by_timestamp(incoming, local),
            ConflictStrategy::UserPriority => {
                let theirs = roles.role_of(&incoming.origin.user_id).priority();
                let ours = roles.role_of(&local.origin.user_id).priority();
                match theirs.cmp(&ours) {
                    Ordering::Greater => Resolution::ApplyIncoming { cancel_local: true },
                    Ordering::Less => Resolution::DropIncoming,
                    Ordering::Equal => by_timestamp(incoming, local),
                }
            }
            ConflictStrategy::IntelligentMerge => self.merge(incoming, local),
        };
        self.resolved += 1;
        log::debug!(
            "conflict between {} #{} and local #{} resolved by {}: {:?}",
            incoming.origin.stroke_key(),
            incoming.sequence_number,
            local.client_sequence,
            self.strategy,
            resolution
        );
        resolution
    }

    fn merge(&self, incoming: &Operation, local: &Operation) -> Resolution {
        let incoming_is_later = match incoming.timestamp.cmp(&local.timestamp) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => incoming.origin.stroke_key() > local.origin.stroke_key(),
        };
        let (later, earlier, target) = if incoming_is_later {
            (incoming, local, MergeTarget::Incoming)
        } else {
            (local, incoming, MergeTarget::Local)
        };
        let sign = if later.origin.stroke_key() > earlier.origin.stroke_key() {
            1.0
        } else {
            -1.0
        };
        let offset = self.merge_offset * sign;
        Resolution::Merge {
            target,
            delta: Vec2::new(offset, offset),
        }
    }

    /// Shift an operation's point by `delta`, staying on the canvas.
    pub fn nudge(&self, op: &Operation, delta: Vec2) -> Operation {
        let mut nudged = op.clone();
        if let Some(p) = op.point {
            let moved = p + delta;
            nudged.point = Some(Point::new(
                moved.x.clamp(0.0, self.extent),
                moved.y.clamp(0.0, self.extent),
            ));
        }
        nudged
    }
}

/// Earlier timestamp wins; equal timestamps go to the lower origin id.
fn by_timestamp(incoming: &Operation, local: &Operation) -> Resolution {
    let incoming_wins = match incoming.timestamp.cmp(&local.timestamp) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => incoming.origin.stroke_key() < local.origin.stroke_key(),
    };
    if incoming_wins {
        Resolution::ApplyIncoming { cancel_local: true }
    } else {
        Resolution::DropIncoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CANVAS_EXTENT, Origin};
    use crate::shapes::BoardColor;

    fn draw(client: &str, user: &str, x: f64, y: f64, ts: u64) -> Operation {
        Operation::draw(Point::new(x, y))
            .with_style(BoardColor::black(), 5.0)
            .with_origin(Origin::new(client, user, user))
            .with_timestamp(ts)
    }

    fn resolver(strategy: ConflictStrategy) -> ConflictResolver {
        ConflictResolver::new(strategy, 1_000, 3.0, CANVAS_EXTENT)
    }

    #[test]
    fn test_overlap_requires_distance_and_time() {
        let r = resolver(ConflictStrategy::IntelligentMerge);
        let a = draw("a", "ua", 100.0, 100.0, 1_000);
        assert!(r.overlaps(&a, &draw("b", "ub", 101.0, 101.0, 1_200)));
        assert!(!r.overlaps(&a, &draw("b", "ub", 110.0, 100.0, 1_200)));
        assert!(!r.overlaps(&a, &draw("b", "ub", 101.0, 101.0, 2_500)));
        assert!(!r.overlaps(&a, &draw("a", "ua", 101.0, 101.0, 1_200)));
    }

    #[test]
    fn test_only_draw_kinds_conflict() {
        let r = resolver(ConflictStrategy::IntelligentMerge);
        let local = draw("a", "ua", 100.0, 100.0, 1_000);
        let erase = Operation::erase(Point::new(100.0, 100.0))
            .with_origin(Origin::new("b", "ub", "ub"))
            .with_timestamp(1_000);
        assert!(r.find_conflicts(&erase, [&local]).is_empty());
    }

    #[test]
    fn test_last_writer_wins_cancels_local() {
        let mut r = resolver(ConflictStrategy::LastWriterWins);
        let out = r.resolve(
            &draw("b", "ub", 1.0, 1.0, 5),
            &draw("a", "ua", 1.0, 1.0, 9),
            &RoleDirectory::new(),
        );
        assert_eq!(out, Resolution::ApplyIncoming { cancel_local: true });
    }

    #[test]
    fn test_timestamp_priority() {
        let mut r = resolver(ConflictStrategy::TimestampPriority);
        let roles = RoleDirectory::new();
        let local = draw("a", "ua", 1.0, 1.0, 100);
        assert_eq!(r.resolve(&draw("b", "ub", 1.0, 1.0, 50), &local, &roles), Resolution::ApplyIncoming { cancel_local: true });
        assert_eq!(r.resolve(&draw("b", "ub", 1.0, 1.0, 150), &local, &roles), Resolution::DropIncoming);
        // Tie goes to the lower origin id: "a" < "b".
        assert_eq!(r.resolve(&draw("b", "ub", 1.0, 1.0, 100), &local, &roles), Resolution::DropIncoming);
    }

    #[test]
    fn test_user_priority_with_fallback() {
        let mut r = resolver(ConflictStrategy::UserPriority);
        let mut roles = RoleDirectory::new();
        roles.set("teacher", Role::Teacher);
        roles.set("student", Role::Student);
        let local = draw("a", "student", 1.0, 1.0, 10);
        assert_eq!(
            r.resolve(&draw("b", "teacher", 1.0, 1.0, 500), &local, &roles),
            Resolution::ApplyIncoming { cancel_local: true }
        );
        let local_teacher = draw("a", "teacher", 1.0, 1.0, 10);
        assert_eq!(r.resolve(&draw("b", "student", 1.0, 1.0, 1), &local_teacher, &roles), Resolution::DropIncoming);
        // Equal roles: earlier timestamp wins.
        assert_eq!(
            r.resolve(&draw("b", "other", 1.0, 1.0, 1), &local, &roles),
            Resolution::ApplyIncoming { cancel_local: true }
        );
    }

    #[test]
    fn test_merge_nudges_later_deterministically() {
        let mut r = resolver(ConflictStrategy::IntelligentMerge);
        let roles = RoleDirectory::new();
        let local = draw("a", "ua", 100.0, 100.0, 1_000);
        let incoming = draw("b", "ub", 101.0, 101.0, 1_200);
        let first = r.resolve(&incoming, &local, &roles);
        let second = r.resolve(&incoming, &local, &roles);
        assert_eq!(first, second);
        assert_eq!(
            first,
            Resolution::Merge {
                target: MergeTarget::Incoming,
                delta: Vec2::new(3.0, 3.0)
            }
        );
        let earlier_incoming = draw("b", "ub", 101.0, 101.0, 800);
        assert_eq!(
            r.resolve(&earlier_incoming, &local, &roles),
            Resolution::Merge {
                target: MergeTarget::Local,
                delta: Vec2::new(-3.0, -3.0)
            }
        );
    }

    #[test]
    fn test_nudge_clamps_to_canvas() {
        let r = resolver(ConflictStrategy::IntelligentMerge);
        let op = draw("a", "ua", 1.0, CANVAS_EXTENT, 0);
        let nudged = r.nudge(&op, Vec2::new(-3.0, 3.0));
        assert_eq!(nudged.point, Some(Point::new(0.0, CANVAS_EXTENT)));
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("user-priority".parse::<ConflictStrategy>(), Ok(ConflictStrategy::UserPriority));
        assert!("coin-flip".parse::<ConflictStrategy>().is_err());
        assert_eq!(Role::parse("Tutor"), Some(Role::Teacher));
    }
}

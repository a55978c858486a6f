//! Drawing operations, the unit of replication.
//!
//! An [`Operation`] is immutable once stamped: the batcher assigns the
//! client sequence before send and the server stamps the lesson-wide
//! `sequence_number` when it relays it.

use crate::shapes::{BoardColor, ObjectSpec};
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Side length of the backing surface of the "infinite" canvas.
pub const CANVAS_EXTENT: f64 = 20_000.0;

/// Smallest brush accepted on the wire.
pub const MIN_BRUSH_SIZE: f64 = 0.5;
/// Largest brush accepted on the wire.
pub const MAX_BRUSH_SIZE: f64 = 500.0;
/// Brush used when a message omits one.
pub const DEFAULT_BRUSH_SIZE: f64 = 3.0;

/// Errors for operations that must never reach the scene.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperationError {
    #[error("operation has no type")]
    MissingKind,
    #[error("unknown operation type: {0}")]
    UnknownKind(String),
    #[error("{axis} coordinate is not numeric")]
    NonNumeric { axis: char },
    #[error("{axis} coordinate {value} outside 0..={extent}")]
    OutOfRange { axis: char, value: f64, extent: f64 },
    #[error("{0} operation requires coordinates")]
    MissingPoint(OperationKind),
    #[error("complete stroke carries no points")]
    EmptyStroke,
    #[error("invalid brush size {0}")]
    InvalidBrush(f64),
    #[error("malformed operation: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Start,
    Draw,
    End,
    Clear,
    Erase,
    CompleteStroke,
}

impl OperationKind {
    /// Parse the wire name, accepting the spellings clients use.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "start" => Some(Self::Start),
            "draw" => Some(Self::Draw),
            "end" => Some(Self::End),
            "clear" => Some(Self::Clear),
            "erase" => Some(Self::Erase),
            "complete_stroke" | "complete-stroke" | "complete_drawing" | "complete-drawing" => {
                Some(Self::CompleteStroke)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Draw => "draw",
            Self::End => "end",
            Self::Clear => "clear",
            Self::Erase => "erase",
            Self::CompleteStroke => "complete_stroke",
        }
    }

    /// Kinds that are meaningless without a coordinate.
    pub fn needs_point(self) -> bool {
        matches!(self, Self::Start | Self::Draw | Self::Erase)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced an operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Origin {
    /// Per-connection id, unique per tab/device.
    pub client_id: String,
    pub user_id: String,
    pub user_name: String,
}

impl Origin {
    pub fn new(client_id: impl Into<String>, user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        }
    }

    /// Key used to track in-progress strokes; legacy messages lack a client id.
    pub fn stroke_key(&self) -> &str {
        if self.client_id.is_empty() {
            &self.user_id
        } else {
            &self.client_id
        }
    }
}

/// A single drawing instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    /// Coordinate; absent for `end` and `clear`.
    pub point: Option<Point>,
    pub color: BoardColor,
    pub brush_size: f64,
    pub origin: Origin,
    /// Lesson-wide order, stamped by the server (equal to the client
    /// sequence until then).
    pub sequence_number: u64,
    /// Order assigned by the originating client.
    pub client_sequence: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Point list of a complete stroke.
    pub points: Vec<Point>,
    /// Non-stroke object carried by a complete stroke.
    pub object: Option<ObjectSpec>,
}

impl Operation {
    pub fn new(kind: OperationKind, point: Option<Point>) -> Self {
        Self {
            kind,
            point,
            color: BoardColor::black(),
            brush_size: DEFAULT_BRUSH_SIZE,
            origin: Origin::default(),
            sequence_number: 0,
            client_sequence: 0,
            timestamp: now_millis(),
            points: Vec::new(),
            object: None,
        }
    }

    pub fn start(point: Point) -> Self {
        Self::new(OperationKind::Start, Some(point))
    }

    pub fn draw(point: Point) -> Self {
        Self::new(OperationKind::Draw, Some(point))
    }

    pub fn end() -> Self {
        Self::new(OperationKind::End, None)
    }

    pub fn clear() -> Self {
        Self::new(OperationKind::Clear, None)
    }

    pub fn erase(point: Point) -> Self {
        Self::new(OperationKind::Erase, Some(point))
    }

    pub fn complete_stroke(points: Vec<Point>) -> Self {
        let mut op = Self::new(OperationKind::CompleteStroke, None);
        op.points = points;
        op
    }

    pub fn complete_object(object: ObjectSpec) -> Self {
        let mut op = Self::new(OperationKind::CompleteStroke, None);
        op.object = Some(object);
        op
    }

    pub fn with_style(mut self, color: BoardColor, brush_size: f64) -> Self {
        self.color = color;
        self.brush_size = brush_size;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence_number = sequence;
        self.client_sequence = sequence;
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn brush_radius(&self) -> f64 {
        self.brush_size / 2.0
    }

    /// Sequence that identifies the stroke this operation starts.
    pub fn stroke_sequence(&self) -> u64 {
        if self.client_sequence != 0 {
            self.client_sequence
        } else {
            self.sequence_number
        }
    }

    pub fn is_from(&self, client_id: &str) -> bool {
        !client_id.is_empty() && self.origin.client_id == client_id
    }

    /// Area this operation can touch on its own, before scene context.
    pub fn impact_bounds(&self) -> Option<Rect> {
        let r = self.brush_radius();
        if let Some(p) = self.point {
            return Some(Rect::from_points(p, p).inflate(r, r));
        }
        if let Some(object) = &self.object {
            return Some(object.clone().into_object().bounds());
        }
        crate::shapes::points_bounds(&self.points).map(|b| b.inflate(r, r))
    }

    /// Reject operations that must never be applied.
    pub fn validate(&self, extent: f64) -> Result<(), OperationError> {
        if !self.brush_size.is_finite() || !(MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).contains(&self.brush_size) {
            return Err(OperationError::InvalidBrush(self.brush_size));
        }
        match self.point {
            Some(p) => {
                check_coordinate('x', p.x, extent)?;
                check_coordinate('y', p.y, extent)?;
            }
            None if self.kind.needs_point() => return Err(OperationError::MissingPoint(self.kind)),
            None => {}
        }
        if self.kind == OperationKind::CompleteStroke {
            let anchors = match &self.object {
                Some(object) => object.anchor_points(),
                None if self.points.is_empty() => return Err(OperationError::EmptyStroke),
                None => self.points.clone(),
            };
            for p in anchors {
                check_coordinate('x', p.x, extent)?;
                check_coordinate('y', p.y, extent)?;
            }
        }
        Ok(())
    }
}

/// Accept `0 ..= extent`, rejecting NaN and infinities.
pub fn check_coordinate(axis: char, value: f64, extent: f64) -> Result<f64, OperationError> {
    if !value.is_finite() {
        return Err(OperationError::NonNumeric { axis });
    }
    if !(0.0..=extent).contains(&value) {
        return Err(OperationError::OutOfRange { axis, value, extent });
    }
    Ok(value)
}

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Wire messages of the lesson channel and the REST state endpoint.
//!
//! Both directions are JSON objects discriminated by `type`. Operations
//! travel as [`WireOperation`]s whose coordinates are decoded leniently:
//! numbers and numeric strings are accepted, anything else drops the
//! operation. Operation lists decode entry by entry, so one bad entry
//! never costs the rest of a snapshot.

use crate::conflict::Role;
use crate::operation::{DEFAULT_BRUSH_SIZE, Operation, OperationError, OperationKind, Origin};
use crate::shapes::{BoardColor, ObjectSpec};
use kurbo::Point;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A point of a complete stroke, with lenient coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    pub x: Value,
    pub y: Value,
}

impl From<Point> for WirePoint {
    fn from(p: Point) -> Self {
        Self {
            x: Value::from(p.x),
            y: Value::from(p.y),
        }
    }
}

/// Operation as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub x: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub y: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brush_size: Option<f64>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub client_sequence: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub sequence_number: u64,
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default, alias = "drawingPoints", skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<WirePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectSpec>,
    /// Why a list entry failed to decode; such an entry never becomes an
    /// operation.
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl WireOperation {
    /// Decode one list entry. A failure yields a placeholder that keeps
    /// the sequence number for diagnostics.
    pub fn from_value(value: Value) -> Self {
        let sequence_number = value.get("sequenceNumber").and_then(Value::as_u64).unwrap_or(0);
        match serde_json::from_value(value) {
            Ok(operation) => operation,
            Err(e) => Self {
                sequence_number,
                malformed: Some(e.to_string()),
                ..Self::default()
            },
        }
    }
}

fn lenient_operations<'de, D>(deserializer: D) -> Result<Vec<WireOperation>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Vec::<Value>::deserialize(deserializer)?;
    Ok(values.into_iter().map(WireOperation::from_value).collect())
}

/// Decode a coordinate from a JSON number or numeric string.
pub fn parse_coordinate(axis: char, value: &Value) -> Result<Option<f64>, OperationError> {
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(OperationError::NonNumeric { axis }),
    }
}

impl WireOperation {
    /// Decode and validate against the canvas extent.
    pub fn into_operation(self, extent: f64) -> Result<Operation, OperationError> {
        if let Some(reason) = self.malformed {
            return Err(OperationError::Malformed(reason));
        }
        let name = self.operation_type.as_deref().ok_or(OperationError::MissingKind)?;
        let kind = OperationKind::parse(name).ok_or_else(|| OperationError::UnknownKind(name.to_string()))?;

        let x = parse_coordinate('x', &self.x)?;
        let y = parse_coordinate('y', &self.y)?;
        let point = match (x, y) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            (None, None) if !kind.needs_point() => None,
            _ => return Err(OperationError::MissingPoint(kind)),
        };

        let mut points = Vec::with_capacity(self.points.len());
        for p in &self.points {
            match (parse_coordinate('x', &p.x)?, parse_coordinate('y', &p.y)?) {
                (Some(x), Some(y)) => points.push(Point::new(x, y)),
                _ => return Err(OperationError::MissingPoint(kind)),
            }
        }

        let color = self
            .color
            .as_deref()
            .map(BoardColor::from_hex_or_black)
            .unwrap_or_default();

        let op = Operation {
            kind,
            point,
            color,
            brush_size: self.brush_size.unwrap_or(DEFAULT_BRUSH_SIZE),
            origin: Origin::new(self.client_id, self.user_id, self.user_name),
            sequence_number: self.sequence_number,
            client_sequence: self.client_sequence,
            timestamp: self.timestamp,
            points,
            object: self.object,
        };
        op.validate(extent)?;
        Ok(op)
    }
}

impl From<&Operation> for WireOperation {
    fn from(op: &Operation) -> Self {
        Self {
            operation_type: Some(op.kind.as_str().to_string()),
            x: op.point.map_or(Value::Null, |p| Value::from(p.x)),
            y: op.point.map_or(Value::Null, |p| Value::from(p.y)),
            color: Some(op.color.to_hex()),
            brush_size: Some(op.brush_size),
            user_id: op.origin.user_id.clone(),
            user_name: op.origin.user_name.clone(),
            client_id: op.origin.client_id.clone(),
            client_sequence: op.client_sequence,
            sequence_number: op.sequence_number,
            timestamp: op.timestamp,
            points: op.points.iter().copied().map(WirePoint::from).collect(),
            object: op.object.clone(),
            malformed: None,
        }
    }
}

/// Decode a list, dropping malformed entries with a diagnostic.
pub fn decode_operations(wire: Vec<WireOperation>, extent: f64) -> (Vec<Operation>, usize) {
    let mut dropped = 0;
    let operations = wire
        .into_iter()
        .filter_map(|w| {
            let seq = w.sequence_number;
            match w.into_operation(extent) {
                Ok(op) => Some(op),
                Err(e) => {
                    log::warn!("dropping malformed operation #{seq}: {e}");
                    dropped += 1;
                    None
                }
            }
        })
        .collect();
    (operations, dropped)
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join {
        user_id: String,
        user_name: String,
        #[serde(default)]
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        timestamp: u64,
    },
    /// Pen down.
    Start {
        #[serde(flatten)]
        operation: WireOperation,
    },
    Draw {
        #[serde(flatten)]
        operation: WireOperation,
    },
    /// Pen up.
    End {
        #[serde(flatten)]
        operation: WireOperation,
    },
    /// One flushed batch of local operations.
    Batch {
        batch_id: Uuid,
        #[serde(deserialize_with = "lenient_operations")]
        operations: Vec<WireOperation>,
    },
    RequestState {
        user_id: String,
        user_name: String,
        #[serde(default)]
        timestamp: u64,
    },
    Clear {
        #[serde(flatten)]
        operation: WireOperation,
    },
    CompleteDrawing {
        #[serde(flatten)]
        operation: WireOperation,
    },
    Erase {
        #[serde(flatten)]
        operation: WireOperation,
    },
    /// Cursor or laser pointer presence; never stored.
    Cursor {
        user_id: String,
        user_name: String,
        x: f64,
        y: f64,
    },
    Leave {
        user_id: String,
        user_name: String,
        #[serde(default)]
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Single-operation message matching the operation's kind.
    pub fn for_operation(op: &Operation) -> Self {
        let operation = WireOperation::from(op);
        match op.kind {
            OperationKind::Start => Self::Start { operation },
            OperationKind::Draw => Self::Draw { operation },
            OperationKind::End => Self::End { operation },
            OperationKind::Clear => Self::Clear { operation },
            OperationKind::Erase => Self::Erase { operation },
            OperationKind::CompleteStroke => Self::CompleteDrawing { operation },
        }
    }

    /// Operations carried by this message, in order.
    pub fn operations(&self) -> Vec<&WireOperation> {
        match self {
            Self::Start { operation }
            | Self::Draw { operation }
            | Self::End { operation }
            | Self::Clear { operation }
            | Self::CompleteDrawing { operation }
            | Self::Erase { operation } => vec![operation],
            Self::Batch { operations, .. } => operations.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    UserJoined {
        user_id: String,
        user_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        connected_users: usize,
    },
    UserLeft {
        user_id: String,
        user_name: String,
        #[serde(default)]
        connected_users: usize,
    },
    DrawOperation {
        #[serde(flatten)]
        operation: WireOperation,
    },
    CompleteDrawing {
        #[serde(flatten)]
        operation: WireOperation,
    },
    /// Erase applied to the board.
    BoardUpdate {
        #[serde(flatten)]
        operation: WireOperation,
    },
    BoardCleared {
        #[serde(flatten)]
        operation: WireOperation,
    },
    LessonEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    CursorPosition {
        user_id: String,
        user_name: String,
        x: f64,
        y: f64,
    },
    BoardState {
        #[serde(deserialize_with = "lenient_operations")]
        operations: Vec<WireOperation>,
        #[serde(default)]
        total_operations: usize,
        #[serde(default)]
        connected_users: usize,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    /// Broadcast message for a sequenced operation.
    pub fn for_operation(operation: WireOperation) -> Self {
        let kind = operation.operation_type.as_deref().and_then(OperationKind::parse);
        match kind {
            Some(OperationKind::CompleteStroke) => Self::CompleteDrawing { operation },
            Some(OperationKind::Erase) => Self::BoardUpdate { operation },
            Some(OperationKind::Clear) => Self::BoardCleared { operation },
            _ => Self::DrawOperation { operation },
        }
    }

    /// The operation a broadcast carries, if any.
    pub fn operation(&self) -> Option<&WireOperation> {
        match self {
            Self::DrawOperation { operation }
            | Self::CompleteDrawing { operation }
            | Self::BoardUpdate { operation }
            | Self::BoardCleared { operation } => Some(operation),
            _ => None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Body of `GET /board/state/{lesson_id}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
    pub success: bool,
    #[serde(default)]
    pub total_operations: usize,
    #[serde(default, deserialize_with = "lenient_operations")]
    pub operations: Vec<WireOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

//! Per-lesson state: broadcast topic, participants and the operation log.

use dashmap::DashMap;
use lessonboard_core::conflict::Role;
use lessonboard_core::operation::{CANVAS_EXTENT, Operation, OperationError};
use lessonboard_core::protocol::{ServerMessage, WireOperation};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Append/replay store of sequenced operations.
///
/// Only an in-memory log ships here; a durable store plugs in behind
/// this trait.
pub trait OperationLog: Send + Sync {
    /// Operations arrive in increasing sequence order.
    fn append(&mut self, operation: WireOperation);
    fn replay(&self) -> Vec<WireOperation>;
    /// The logged operation with this lesson sequence.
    fn get(&self, sequence: u64) -> Option<WireOperation>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    operations: Vec<WireOperation>,
}

impl OperationLog for MemoryLog {
    fn append(&mut self, operation: WireOperation) {
        self.operations.push(operation);
    }

    fn replay(&self) -> Vec<WireOperation> {
        self.operations.clone()
    }

    fn get(&self, sequence: u64) -> Option<WireOperation> {
        self.operations
            .binary_search_by_key(&sequence, |op| op.sequence_number)
            .ok()
            .map(|i| self.operations[i].clone())
    }

    fn len(&self) -> usize {
        self.operations.len()
    }
}

/// A message on a lesson topic. `skip` names the connection that should
/// not receive it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub skip: Option<String>,
    pub message: ServerMessage,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    pub role: Option<Role>,
}

/// Result of appending client operations.
#[derive(Debug, Default)]
pub struct Appended {
    /// Newly sequenced operations, for everyone.
    pub fresh: Vec<WireOperation>,
    /// Already-logged operations resent by their author; echoed back to
    /// the sender only.
    pub replayed: Vec<WireOperation>,
    pub rejected: Vec<OperationError>,
}

pub struct Lesson {
    tx: broadcast::Sender<Envelope>,
    participants: HashMap<String, Participant>,
    log: Box<dyn OperationLog>,
    last_sequence: u64,
    /// (client id, client sequence) to the lesson sequence it was given.
    seen: HashMap<(String, u64), u64>,
}

impl Lesson {
    pub fn new(log: Box<dyn OperationLog>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let last_sequence = log
            .replay()
            .iter()
            .map(|op| op.sequence_number)
            .max()
            .unwrap_or(0);
        Self {
            tx,
            participants: HashMap::new(),
            log,
            last_sequence,
            seen: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, skip: Option<&str>, message: ServerMessage) {
        // No receivers is fine.
        let _ = self.tx.send(Envelope {
            skip: skip.map(str::to_string),
            message,
        });
    }

    pub fn connected_users(&self) -> usize {
        self.participants.len()
    }

    pub fn join(&mut self, connection: &str, participant: Participant) -> usize {
        self.participants.insert(connection.to_string(), participant);
        self.participants.len()
    }

    pub fn leave(&mut self, connection: &str) -> Option<Participant> {
        self.participants.remove(connection)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// Validate, sequence and log client operations in order.
    pub fn append(&mut self, operations: Vec<WireOperation>) -> Appended {
        let mut out = Appended::default();
        for wire in operations {
            let mut op: Operation = match wire.into_operation(CANVAS_EXTENT) {
                Ok(op) => op,
                Err(e) => {
                    out.rejected.push(e);
                    continue;
                }
            };
            let key = (op.origin.client_id.clone(), op.client_sequence);
            let dedup = !key.0.is_empty() && key.1 != 0;
            if let Some(&sequence) = self.seen.get(&key).filter(|_| dedup) {
                match self.log.get(sequence) {
                    Some(logged) => out.replayed.push(logged),
                    None => tracing::warn!(sequence, "resent operation missing from the log"),
                }
                continue;
            }

            self.last_sequence += 1;
            op.sequence_number = self.last_sequence;
            if op.timestamp == 0 {
                op.timestamp = now_millis();
            }
            if dedup {
                self.seen.insert(key, self.last_sequence);
            }
            let wire = WireOperation::from(&op);
            self.log.append(wire.clone());
            out.fresh.push(wire);
        }
        out
    }

    pub fn snapshot(&self) -> Vec<WireOperation> {
        self.log.replay()
    }

    pub fn board_state(&self) -> ServerMessage {
        let operations = self.snapshot();
        ServerMessage::BoardState {
            total_operations: operations.len(),
            operations,
            connected_users: self.connected_users(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// All open lessons.
#[derive(Default)]
pub struct LessonHub {
    lessons: DashMap<String, Lesson>,
}

impl LessonHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against a lesson, creating it on first use.
    pub fn with_lesson<R>(&self, lesson_id: &str, f: impl FnOnce(&mut Lesson) -> R) -> R {
        let mut lesson = self
            .lessons
            .entry(lesson_id.to_string())
            .or_insert_with(|| Lesson::new(Box::new(MemoryLog::default())));
        f(lesson.value_mut())
    }

    /// Run `f` against an existing lesson.
    pub fn existing<R>(&self, lesson_id: &str, f: impl FnOnce(&mut Lesson) -> R) -> Option<R> {
        self.lessons.get_mut(lesson_id).map(|mut lesson| f(lesson.value_mut()))
    }

    /// Broadcast `lesson_ended` and drop the lesson with its log.
    pub fn end(&self, lesson_id: &str, message: Option<String>) -> bool {
        match self.lessons.remove(lesson_id) {
            Some((_, lesson)) => {
                lesson.broadcast(None, ServerMessage::LessonEnded { message });
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}

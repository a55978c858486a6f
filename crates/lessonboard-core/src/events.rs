//! Typed events the board publishes to its host.

use crate::conflict::{ConflictStrategy, Role};
use crate::transport::{ConnectionStatus, StatusIndicator};
use kurbo::Point;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    StatusChanged {
        status: ConnectionStatus,
        indicator: StatusIndicator,
    },
    /// Transient, non-blocking message for the user.
    Notice { level: NoticeLevel, message: String },
    PeerJoined {
        user_id: String,
        user_name: String,
        role: Role,
    },
    PeerLeft { user_id: String, user_name: String },
    CursorMoved {
        user_id: String,
        user_name: String,
        position: Point,
    },
    LessonEnded { message: Option<String> },
    /// A sequence gap was found; a full state pull is on its way.
    ResyncRequested { expected: u64, received: u64 },
    BoardCleared { by: String },
    ConflictResolved {
        strategy: ConflictStrategy,
        remote_user: String,
        local_sequence: u64,
    },
}

/// FIFO of events, drained by the host once per loop turn.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    queue: VecDeque<BoardEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: BoardEvent) {
        log::trace!("event: {event:?}");
        self.queue.push_back(event);
    }

    pub fn notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        self.publish(BoardEvent::Notice {
            level,
            message: message.into(),
        });
    }

    pub fn drain(&mut self) -> Vec<BoardEvent> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

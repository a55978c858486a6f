//! WebSocket relay: one connection per participant, one topic per lesson.

use crate::AppState;
use crate::lesson::{LessonHub, Participant};
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use lessonboard_core::protocol::{ClientMessage, ServerMessage, WireOperation};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(lesson_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, lesson_id, state))
}

async fn handle_socket(socket: WebSocket, lesson_id: String, state: Arc<AppState>) {
    let connection = Uuid::new_v4().to_string();
    info!(%lesson_id, %connection, "connection opened");

    let (mut sender, mut receiver) = socket.split();
    let mut topic = state.hub.with_lesson(&lesson_id, |lesson| lesson.subscribe());

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_text(&state.hub, &lesson_id, &connection, &text);
                        if !send_all(&mut sender, replies).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong and binary
                    Some(Err(e)) => {
                        warn!(%connection, "websocket error: {e}");
                        break;
                    }
                }
            }

            envelope = topic.recv() => {
                match envelope {
                    Ok(envelope) => {
                        if envelope.skip.as_deref() == Some(connection.as_str()) {
                            continue;
                        }
                        let ended = matches!(envelope.message, ServerMessage::LessonEnded { .. });
                        if !send_all(&mut sender, vec![envelope.message]).await || ended {
                            break;
                        }
                    }
                    // The client sees the sequence gap and resyncs.
                    Err(RecvError::Lagged(missed)) => warn!(%connection, "lagged {missed} messages"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    let left = state.hub.existing(&lesson_id, |lesson| {
        let participant = lesson.leave(&connection)?;
        let connected_users = lesson.connected_users();
        lesson.broadcast(
            Some(&connection),
            ServerMessage::UserLeft {
                user_id: participant.user_id.clone(),
                user_name: participant.user_name.clone(),
                connected_users,
            },
        );
        Some(participant)
    });
    if let Some(Some(participant)) = left {
        info!(%lesson_id, user = %participant.user_id, "participant left");
    }
    info!(%connection, "connection closed");
}

async fn send_all<S>(sender: &mut S, messages: Vec<ServerMessage>) -> bool
where
    S: Sink<Message> + Unpin,
{
    for message in messages {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode {message:?}: {e}");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            return false;
        }
    }
    true
}

fn with_kind(mut operation: WireOperation, kind: &str) -> WireOperation {
    operation.operation_type.get_or_insert_with(|| kind.to_string());
    operation
}

/// Apply one client message. Returns the point-to-point replies; anything
/// for the whole lesson goes out on its topic.
pub fn handle_text(hub: &LessonHub, lesson_id: &str, connection: &str, text: &str) -> Vec<ServerMessage> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(%connection, "invalid message: {e}");
            return vec![ServerMessage::Error {
                message: format!("Invalid message: {e}"),
            }];
        }
    };

    match message {
        ClientMessage::Join {
            user_id,
            user_name,
            role,
            ..
        } => {
            hub.with_lesson(lesson_id, |lesson| {
                let participant = Participant {
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                    role,
                };
                let connected_users = lesson.join(connection, participant);
                lesson.broadcast(
                    None,
                    ServerMessage::UserJoined {
                        user_id: user_id.clone(),
                        user_name,
                        role,
                        connected_users,
                    },
                );
            });
            info!(%lesson_id, user = %user_id, "participant joined");
            Vec::new()
        }
        ClientMessage::Start { operation } => relay_operations(hub, lesson_id, vec![with_kind(operation, "start")]),
        ClientMessage::Draw { operation } => relay_operations(hub, lesson_id, vec![with_kind(operation, "draw")]),
        ClientMessage::End { operation } => relay_operations(hub, lesson_id, vec![with_kind(operation, "end")]),
        ClientMessage::Clear { operation } => relay_operations(hub, lesson_id, vec![with_kind(operation, "clear")]),
        ClientMessage::Erase { operation } => relay_operations(hub, lesson_id, vec![with_kind(operation, "erase")]),
        ClientMessage::CompleteDrawing { operation } => {
            relay_operations(hub, lesson_id, vec![with_kind(operation, "complete-drawing")])
        }
        ClientMessage::Batch { batch_id, operations } => {
            debug!(%batch_id, count = operations.len(), "batch");
            relay_operations(hub, lesson_id, operations)
        }
        ClientMessage::RequestState { user_id, .. } => {
            debug!(%lesson_id, user = %user_id, "state requested");
            vec![hub.with_lesson(lesson_id, |lesson| lesson.board_state())]
        }
        ClientMessage::Cursor {
            user_id,
            user_name,
            x,
            y,
        } => {
            hub.with_lesson(lesson_id, |lesson| {
                lesson.broadcast(
                    Some(connection),
                    ServerMessage::CursorPosition {
                        user_id,
                        user_name,
                        x,
                        y,
                    },
                )
            });
            Vec::new()
        }
        ClientMessage::Leave { user_id, user_name, .. } => {
            hub.existing(lesson_id, |lesson| {
                if lesson.leave(connection).is_some() {
                    let connected_users = lesson.connected_users();
                    lesson.broadcast(
                        Some(connection),
                        ServerMessage::UserLeft {
                            user_id,
                            user_name,
                            connected_users,
                        },
                    );
                }
            });
            Vec::new()
        }
    }
}

/// Sequence, log and broadcast. Broadcasting under the lesson lock keeps
/// topic order equal to sequence order.
fn relay_operations(hub: &LessonHub, lesson_id: &str, operations: Vec<WireOperation>) -> Vec<ServerMessage> {
    let appended = hub.with_lesson(lesson_id, |lesson| {
        let appended = lesson.append(operations);
        for operation in &appended.fresh {
            lesson.broadcast(None, ServerMessage::for_operation(operation.clone()));
        }
        appended
    });

    let mut replies: Vec<ServerMessage> = appended.replayed.into_iter().map(ServerMessage::for_operation).collect();
    for e in appended.rejected {
        warn!(%lesson_id, "rejected operation: {e}");
        replies.push(ServerMessage::Error {
            message: format!("Rejected operation: {e}"),
        });
    }
    replies
}

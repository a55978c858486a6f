//! REST surface: state fallback, health, lesson end.

use crate::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use lessonboard_core::protocol::StateResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

/// `GET /board/state/{lesson_id}`. A lesson nobody has drawn in yet has
/// an empty board.
pub async fn board_state(State(state): State<Arc<AppState>>, Path(lesson_id): Path<String>) -> Json<StateResponse> {
    let operations = state
        .hub
        .existing(&lesson_id, |lesson| lesson.snapshot())
        .unwrap_or_default();
    Json(StateResponse {
        success: true,
        total_operations: operations.len(),
        operations,
        message: None,
    })
}

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
struct EndRequest {
    #[serde(default)]
    message: Option<String>,
}

/// `POST /lessons/{lesson_id}/end`, with an optional `{"message": ...}`.
pub async fn end_lesson(
    State(state): State<Arc<AppState>>,
    Path(lesson_id): Path<String>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let request: EndRequest = if body.trim().is_empty() {
        EndRequest::default()
    } else {
        match serde_json::from_str(&body) {
            Ok(request) => request,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"success": false, "message": format!("Invalid body: {e}")})),
                );
            }
        }
    };

    if state.hub.end(&lesson_id, request.message) {
        info!(%lesson_id, "lesson ended");
        (StatusCode::OK, Json(json!({"success": true})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "message": "Unknown lesson"})),
        )
    }
}

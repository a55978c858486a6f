//! LessonBoard relay server
//!
//! Sequences and fans out board operations between the participants of a
//! lesson, and serves the operation log to clients that fall back to REST.
//!
//! ## Endpoints
//!
//! - `GET /ws/{lesson_id}`: lesson channel (JSON messages tagged by `type`)
//! - `GET /board/state/{lesson_id}`: `{success, totalOperations, operations}`
//! - `POST /lessons/{lesson_id}/end`: broadcast `lesson_ended`, drop the log
//! - `GET /health`

mod api;
mod lesson;
mod relay;

use axum::{
    Router,
    routing::{get, post},
};
use lesson::LessonHub;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Bind address override.
const ENV_ADDR: &str = "LESSONBOARD_ADDR";
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// Shared application state
#[derive(Default)]
pub struct AppState {
    pub hub: LessonHub,
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/{lesson_id}", get(relay::ws_handler))
        .route("/board/state/{lesson_id}", get(api::board_state))
        .route("/lessons/{lesson_id}/end", post(api::end_lesson))
        .route("/health", get(api::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lessonboard_server=info,tower_http=info".into()),
        )
        .init();

    let addr: SocketAddr = std::env::var(ENV_ADDR)
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;

    let state = Arc::new(AppState::default());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("LessonBoard relay listening on {addr}");
    info!("lesson channel: ws://{addr}/ws/{{lesson_id}}");

    axum::serve(listener, app(state)).await?;
    Ok(())
}

//! HTTP surface
//!
//! Two ways in: a plain `POST /api/chat` that blocks until the turn is done,
//! and `POST /api/chat/stream`, a server-sent-events variant that reports
//! progress (`thinking` → `classified` → `answer` | `error`) so a slow agent
//! still feels responsive. Both go through the same session; the turn lock
//! inside it keeps requests serialized.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::models::TurnOutcome;
use crate::session::{Session, TurnEvent};

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<Session>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn chat(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<Value>) {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Empty message" })),
        );
    }

    match state.session.handle_message(&message).await {
        Ok(TurnOutcome::Answered(reply)) => (
            StatusCode::OK,
            Json(serde_json::to_value(reply).unwrap_or_default()),
        ),
        Ok(TurnOutcome::Unclassified { reason }) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "could not classify", "reason": reason })),
        ),
        Err(e) => {
            error!("Chat turn failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn chat_stream(State(state): State<ApiState>, Json(req): Json<ChatRequest>) -> Response {
    let message = req.message.trim().to_string();
    if message.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Empty message" })),
        )
            .into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel::<Value>();

    // The phone shows a typing animation from the first event
    let _ = tx.send(json!({ "type": "thinking" }));

    let session = state.session.clone();
    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TurnEvent>();

        let progress_tx = tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let TurnEvent::Classified {
                    category,
                    confidence,
                } = event;
                let _ = progress_tx.send(json!({
                    "type": "classified",
                    "category": category,
                    "confidence": confidence,
                }));
            }
        });

        let payload = match session.handle_message_observed(&message, event_tx).await {
            Ok(TurnOutcome::Answered(reply)) => json!({
                "type": "answer",
                "answer": reply.answer,
                "category": reply.category,
                "confidence": reply.confidence,
                "reason": reply.reason,
                "mission": reply.mission,
            }),
            Ok(TurnOutcome::Unclassified { reason }) => json!({
                "type": "error",
                "error": format!("could not classify: {}", reason),
            }),
            Err(e) => {
                error!("Streaming chat turn failed: {}", e);
                json!({ "type": "error", "error": e.to_string() })
            }
        };

        // Progress events drain before the final payload
        let _ = forward.await;
        let _ = tx.send(payload);
    });

    let event_stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Some(value) => Some((
                Ok::<_, Infallible>(Event::default().data(value.to_string())),
                rx,
            )),
            None => None,
        }
    });

    Sse::new(event_stream)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

pub fn create_router(session: Arc<Session>) -> Router {
    let state = ApiState { session };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/stream", post(chat_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

pub async fn start_server(
    session: Arc<Session>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(session);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

//! HTTP surface: the WebSocket endpoint clients attach to, plus a
//! liveness probe.

use crate::events::{ClientId, EventBus, Outbound};
use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use plot_common::types::JobId;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Shared state for the router.
#[derive(Clone)]
pub struct AppState {
    pub bus: EventBus,
    pub jobs: crate::jobs::JobManager,
    pub started_at: Instant,
    pub version: &'static str,
    pub simulation: bool,
}

/// Build the daemon's router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
        "simulation": state.simulation,
        "clients": state.bus.client_count().await,
        "activeJob": state.jobs.active_job_id().await.map(|id| id.to_string()),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let bus = state.bus.clone();
    ws.on_upgrade(move |socket| client_session(socket, bus))
}

/// Messages clients may send upstream.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Drive one client connection: pump bus output to the socket and feed
/// subscription requests back into the bus.
async fn client_session(socket: WebSocket, bus: EventBus) {
    let (client_id, mut outbound) = bus.register().await;
    let (mut sink, mut stream) = socket.split();

    bus.send_to(
        &client_id,
        "connected",
        &json!({ "clientId": client_id.to_string() }),
    )
    .await;

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let frame = match message {
                Outbound::Event(payload) => Message::Text(payload.into()),
                Outbound::Ping => Message::Ping(Vec::new().into()),
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                handle_client_message(&bus, &client_id, text.as_str()).await;
            }
            Message::Pong(_) => bus.mark_alive(&client_id).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    debug!(client = %client_id, "client session ended");
    bus.unregister(&client_id).await;
    // Dropping the handle closes the outbound channel; the writer ends
    // on its own.
    let _ = writer.await;
}

async fn handle_client_message(bus: &EventBus, client_id: &ClientId, text: &str) {
    let message: InboundMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(client = %client_id, "unparseable client message: {e}");
            bus.send_to(
                client_id,
                "error",
                &json!({ "message": format!("invalid message: {e}") }),
            )
            .await;
            return;
        }
    };

    match message.kind.as_str() {
        "subscribe" => match job_id_of(&message.data) {
            Some(job_id) => {
                bus.subscribe(client_id, job_id).await;
                bus.send_to(
                    client_id,
                    "subscribed",
                    &json!({ "jobId": job_id.to_string() }),
                )
                .await;
            }
            None => {
                bus.send_to(
                    client_id,
                    "error",
                    &json!({ "message": "subscribe requires a jobId" }),
                )
                .await;
            }
        },
        "unsubscribe" => match job_id_of(&message.data) {
            Some(job_id) => {
                bus.unsubscribe(client_id, &job_id).await;
                bus.send_to(
                    client_id,
                    "unsubscribed",
                    &json!({ "jobId": job_id.to_string() }),
                )
                .await;
            }
            None => {
                bus.send_to(
                    client_id,
                    "error",
                    &json!({ "message": "unsubscribe requires a jobId" }),
                )
                .await;
            }
        },
        "ping" => {
            bus.mark_alive(client_id).await;
            bus.send_to(client_id, "pong", &json!({})).await;
        }
        other => {
            bus.send_to(
                client_id,
                "error",
                &json!({ "message": format!("unknown message type {other:?}") }),
            )
            .await;
        }
    }
}

fn job_id_of(data: &serde_json::Value) -> Option<JobId> {
    data.get("jobId")
        .and_then(|v| v.as_str())
        .and_then(JobId::parse)
}

//! `/ws/frames` (inbound), `/ws/dashboard/{camera_id}` and `/ws/alerts`
//! (outbound) — the push-connection twin of the `/frames/upload` and
//! `/analytics`/`/alerts` polling surface.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ingest::{self, FrameMessage};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct InboundFrame {
    camera_id: String,
    frame_id: u64,
    timestamp: DateTime<Utc>,
    frame_data: String,
    width: u32,
    height: u32,
}

pub async fn frames(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_inbound_frames(socket, state))
}

async fn handle_inbound_frames(mut socket: WebSocket, state: Arc<AppState>) {
    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };

        let parsed: Result<InboundFrame, _> = serde_json::from_str(&text);
        let inbound = match parsed {
            Ok(inbound) => inbound,
            Err(err) => {
                tracing::warn!(error = %err, "malformed /ws/frames payload, dropping");
                continue;
            }
        };

        let encoded_bytes = match BASE64.decode(inbound.frame_data) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(camera_id = %inbound.camera_id, error = %err, "invalid base64 frame_data, dropping");
                continue;
            }
        };

        let msg = FrameMessage {
            camera_id: inbound.camera_id,
            frame_id: inbound.frame_id,
            timestamp: inbound.timestamp,
            encoded_bytes,
            width: inbound.width,
            height: inbound.height,
        };
        if let Err(err) = ingest::enqueue_frame(&state.ingest, msg) {
            tracing::warn!(error = %err, "rejected /ws/frames message");
        }
    }
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_dashboard(socket, state, camera_id))
}

async fn handle_dashboard(mut socket: WebSocket, state: Arc<AppState>, camera_id: String) {
    let (sub_id, mut rx) = state.push.subscribe_metrics(&camera_id);
    while let Some(push) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&push) else { continue };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    state.push.unsubscribe_metrics(&camera_id, sub_id);
}

pub async fn alerts(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_alerts(socket, state))
}

async fn handle_alerts(mut socket: WebSocket, state: Arc<AppState>) {
    let (sub_id, mut rx) = state.push.subscribe_alerts();
    while let Some(push) = rx.recv().await {
        let Ok(text) = serde_json::to_string(&push) else { continue };
        if socket.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    state.push.unsubscribe_alerts(sub_id);
}

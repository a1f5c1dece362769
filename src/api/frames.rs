//! `POST /frames/upload`: multipart ingress, the non-push twin of `/ws/frames`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Multipart, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::ingest::{self, AdmissionResult, FrameMessage};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub frame_id: u64,
    pub processing_time_ms: f64,
}

fn status_label(result: AdmissionResult) -> &'static str {
    match result {
        AdmissionResult::Enqueued => "enqueued",
        AdmissionResult::DroppedOldest => "dropped_oldest",
        AdmissionResult::RejectedOutOfOrder => "rejected",
    }
}

/// Fields arrive as separate multipart parts named `camera_id`, `frame_id`,
/// `frame` (JPEG bytes), and an optional `timestamp`.
pub async fn upload(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> AppResult<Json<UploadResponse>> {
    let started = Instant::now();

    let mut camera_id: Option<String> = None;
    let mut frame_id: Option<u64> = None;
    let mut timestamp: Option<DateTime<Utc>> = None;
    let mut frame_bytes: Option<Vec<u8>> = None;
    let mut width: u32 = 0;
    let mut height: u32 = 0;

    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::Validation(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "camera_id" => {
                camera_id = Some(field.text().await.map_err(|e| AppError::Validation(e.to_string()))?);
            }
            "frame_id" => {
                let text = field.text().await.map_err(|e| AppError::Validation(e.to_string()))?;
                frame_id = Some(text.parse().map_err(|_| AppError::Validation("frame_id must be an integer".to_string()))?);
            }
            "timestamp" => {
                let text = field.text().await.map_err(|e| AppError::Validation(e.to_string()))?;
                timestamp = Some(
                    DateTime::parse_from_rfc3339(&text)
                        .map_err(|_| AppError::Validation("timestamp must be ISO-8601".to_string()))?
                        .with_timezone(&Utc),
                );
            }
            "frame" => {
                let bytes = field.bytes().await.map_err(|e| AppError::Validation(e.to_string()))?;
                let (w, h) = decoded_dimensions(&bytes)?;
                width = w;
                height = h;
                frame_bytes = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    let camera_id = camera_id.ok_or_else(|| AppError::Validation("missing camera_id field".to_string()))?;
    let frame_bytes = frame_bytes.ok_or_else(|| AppError::Validation("missing frame field".to_string()))?;
    let frame_id = frame_id.unwrap_or_else(|| Utc::now().timestamp_millis() as u64);
    let timestamp = timestamp.unwrap_or_else(Utc::now);

    let msg = FrameMessage { camera_id, frame_id, timestamp, encoded_bytes: frame_bytes, width, height };
    let result = ingest::enqueue_frame(&state.ingest, msg)?;

    Ok(Json(UploadResponse {
        status: status_label(result),
        frame_id,
        processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}

fn decoded_dimensions(bytes: &[u8]) -> AppResult<(u32, u32)> {
    let buf = opencv::core::Vector::<u8>::from_slice(bytes);
    let mat = opencv::imgcodecs::imdecode(&buf, opencv::imgcodecs::IMREAD_COLOR)
        .map_err(|e| AppError::Validation(format!("undecodable frame: {e}")))?;
    use opencv::prelude::*;
    if mat.empty() {
        return Err(AppError::Validation("undecodable frame".to_string()));
    }
    Ok((mat.cols() as u32, mat.rows() as u32))
}

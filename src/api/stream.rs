//! `GET /stream/{camera_id}` (MJPEG) and `GET /cameras/{camera_id}/snapshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::Deserialize;

use crate::annotator::{annotate, RenderOptions};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

const STREAM_PERIOD: Duration = Duration::from_millis(33); // ~30 Hz

#[derive(Debug, Deserialize, Default)]
pub struct RenderQuery {
    #[serde(default)]
    pub show_heatmap: bool,
    #[serde(default)]
    pub show_zones: bool,
    #[serde(default)]
    pub show_track_ids: bool,
    #[serde(default)]
    pub show_metrics: bool,
    #[serde(default)]
    pub annotated: bool,
}

impl RenderQuery {
    fn options(&self) -> RenderOptions {
        RenderOptions {
            show_boxes: self.show_track_ids,
            show_track_ids: self.show_track_ids,
            show_zones: self.show_zones,
            show_flow: false,
            show_heatmap: self.show_heatmap,
            show_metrics: self.show_metrics,
            show_risk_bar: self.show_metrics,
        }
    }
}

/// Render the latest cached frame for a camera with the requested overlays.
/// Per-track boxes are unavailable outside the owning worker, so overlays
/// here are limited to zones/metrics/risk — the ones the cache + DB can
/// answer without reaching into worker-private state.
fn render_frame(state: &AppState, camera_id: &str, q: &RenderQuery) -> AppResult<Vec<u8>> {
    let cached = state
        .frame_cache
        .get_latest(camera_id)
        .ok_or_else(|| AppError::NotFound(format!("no frames cached yet for camera {camera_id}")))?;

    if !q.show_zones && !q.show_metrics && !q.show_heatmap {
        return Ok(cached.jpeg_bytes.as_ref().clone());
    }

    let buf = opencv::core::Vector::<u8>::from_slice(&cached.jpeg_bytes);
    let frame = opencv::imgcodecs::imdecode(&buf, opencv::imgcodecs::IMREAD_COLOR)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;

    let zones = state.db.list_zones_for_camera(camera_id)?;
    let sample = state.db.latest_sample(camera_id)?;

    annotate(&frame, &[], &zones, sample.as_ref(), &q.options()).map_err(AppError::Internal)
}

pub async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(q): Query<RenderQuery>,
) -> AppResult<Response> {
    let jpeg = render_frame(&state, &camera_id, &q)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

const BOUNDARY: &str = "frame";

/// When no new frame has arrived, keeps emitting the last rendered frame
/// at the paced rate instead of tearing the connection down.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(q): Query<RenderQuery>,
) -> AppResult<Response> {
    let mut last_frame = render_frame(&state, &camera_id, &q)?;

    let ticker = tokio::time::interval(STREAM_PERIOD);
    let body_stream = tokio_stream::wrappers::IntervalStream::new(ticker)
        .map(move |_| {
            match render_frame(&state, &camera_id, &q) {
                Ok(jpeg) => {
                    last_frame = jpeg;
                }
                Err(err) => {
                    tracing::debug!(camera_id = %camera_id, error = %err, "stream: re-emitting last rendered frame as placeholder");
                }
            }
            last_frame.clone()
        })
        .map(|jpeg| {
            let mut part = Vec::with_capacity(jpeg.len() + 64);
            part.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", jpeg.len()).as_bytes(),
            );
            part.extend_from_slice(&jpeg);
            part.extend_from_slice(b"\r\n");
            Ok::<Bytes, std::io::Error>(Bytes::from(part))
        });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={BOUNDARY}"))
        .body(Body::from_stream(body_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(response)
}

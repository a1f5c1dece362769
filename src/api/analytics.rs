//! `GET /analytics/{camera_id}/{realtime,history,heatmap,entry-exit}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::{AnalyticsSample, EntryExitEvent};
use crate::state::AppState;

pub async fn realtime(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> AppResult<Json<AnalyticsSample>> {
    state
        .db
        .latest_sample(&camera_id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no analytics samples yet for camera {camera_id}")))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub interval: i64,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> AppResult<Json<Vec<AnalyticsSample>>> {
    if q.end_time < q.start_time {
        return Err(AppError::Validation("end_time must not precede start_time".to_string()));
    }
    Ok(Json(state.db.history(&camera_id, q.start_time, q.end_time, q.interval)?))
}

#[derive(Debug, Deserialize)]
pub struct HeatmapQuery {
    #[serde(default = "default_duration_secs")]
    pub duration: i64,
}

fn default_duration_secs() -> i64 {
    3600
}

#[derive(Debug, Serialize)]
pub struct HeatmapResponse {
    pub heatmap: String,
    pub resolution: (u32, u32),
    pub timestamp: DateTime<Utc>,
    pub duration: i64,
}

pub async fn heatmap(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(q): Query<HeatmapQuery>,
) -> AppResult<Json<HeatmapResponse>> {
    if q.duration <= 0 {
        return Err(AppError::Validation("duration must be positive".to_string()));
    }
    let now = Utc::now();
    let start = now - chrono::Duration::seconds(q.duration);
    let samples = state.db.history(&camera_id, start, now, 0)?;
    let (png, resolution) = crate::annotator::render_density_heatmap(&samples).map_err(AppError::Internal)?;

    Ok(Json(HeatmapResponse { heatmap: BASE64.encode(png), resolution, timestamp: now, duration: q.duration }))
}

#[derive(Debug, Deserialize)]
pub struct EntryExitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

pub async fn entry_exit(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(q): Query<EntryExitQuery>,
) -> AppResult<Json<Vec<EntryExitEvent>>> {
    Ok(Json(state.db.recent_entry_exit_events(&camera_id, q.limit)?))
}

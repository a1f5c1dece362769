//! `GET /movements`, `/movements/camera/{id}`, `/movements/pair/{a}/{b}`,
//! `/movements/statistics`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::model::CrossCameraMovement;
use crate::state::AppState;

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub entry_camera_id: Option<String>,
    pub exit_camera_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<Vec<CrossCameraMovement>>> {
    let rows = state.db.search_movements(
        q.entry_camera_id.as_deref(),
        q.exit_camera_id.as_deref(),
        q.start_time,
        q.end_time,
        q.limit,
    )?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub async fn for_camera(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> AppResult<Json<Vec<CrossCameraMovement>>> {
    Ok(Json(state.db.movements_for_camera(&id, q.limit)?))
}

pub async fn for_pair(
    State(state): State<Arc<AppState>>,
    Path((a, b)): Path<(String, String)>,
    Query(q): Query<LimitQuery>,
) -> AppResult<Json<Vec<CrossCameraMovement>>> {
    Ok(Json(state.db.movements_for_pair(&a, &b, q.limit)?))
}

#[derive(Debug, Serialize)]
pub struct StatisticsResponse {
    pub total_movements: u64,
    pub avg_similarity: f64,
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> AppResult<Json<StatisticsResponse>> {
    let (total_movements, avg_similarity) = state.db.movement_statistics()?;
    Ok(Json(StatisticsResponse { total_movements, avg_similarity }))
}

//! `GET /alerts/active`, `POST /alerts/{id}/acknowledge`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::model::{Alert, RiskLevel};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActiveAlertsQuery {
    pub camera_id: Option<String>,
    pub severity: Option<String>,
    pub limit: Option<u32>,
}

fn parse_severity(raw: &str) -> AppResult<RiskLevel> {
    match raw.to_ascii_uppercase().as_str() {
        "NORMAL" => Ok(RiskLevel::Normal),
        "WARNING" => Ok(RiskLevel::Warning),
        "CRITICAL" => Ok(RiskLevel::Critical),
        other => Err(AppError::Validation(format!("unknown severity {other}"))),
    }
}

pub async fn active(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActiveAlertsQuery>,
) -> AppResult<Json<Vec<Alert>>> {
    let severity = q.severity.as_deref().map(parse_severity).transpose()?;
    let alerts = state.db.active_alerts(q.camera_id.as_deref(), severity, q.limit.unwrap_or(100))?;
    Ok(Json(alerts))
}

pub async fn acknowledge(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> AppResult<Json<Alert>> {
    state
        .db
        .acknowledge_alert(id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("alert {id} not found")))
}

//! `POST /zones`, `GET /zones/{camera_id}`, `PUT /zones/{id}`, `DELETE /zones/{id}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::model::{Zone, ZoneType};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateZoneRequest {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub polygon: Vec<(i32, i32)>,
    pub max_capacity: Option<u32>,
}

fn validate_polygon(polygon: &[(i32, i32)]) -> AppResult<()> {
    if polygon.len() < 3 {
        return Err(AppError::Validation("polygon must have at least 3 points".to_string()));
    }
    Ok(())
}

pub async fn create(State(state): State<Arc<AppState>>, Json(req): Json<CreateZoneRequest>) -> AppResult<Json<Zone>> {
    validate_polygon(&req.polygon)?;
    if state.db.get_zone(&req.id)?.is_some() {
        return Err(AppError::Conflict(format!("zone {} already exists", req.id)));
    }

    let zone = Zone {
        id: req.id,
        camera_id: req.camera_id,
        name: req.name,
        zone_type: req.zone_type,
        polygon: req.polygon,
        max_capacity: req.max_capacity,
        current_occupancy: 0,
        status: "active".to_string(),
    };
    state.db.create_zone(&zone)?;
    Ok(Json(zone))
}

pub async fn list_for_camera(
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
) -> AppResult<Json<Vec<Zone>>> {
    Ok(Json(state.db.list_zones_for_camera(&camera_id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateZoneRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub zone_type: Option<ZoneType>,
    pub polygon: Option<Vec<(i32, i32)>>,
    pub max_capacity: Option<u32>,
    pub status: Option<String>,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateZoneRequest>,
) -> AppResult<Json<Zone>> {
    let mut zone = state.db.get_zone(&id)?.ok_or_else(|| AppError::NotFound(format!("zone {id} not found")))?;

    if let Some(polygon) = req.polygon {
        validate_polygon(&polygon)?;
        zone.polygon = polygon;
    }
    if let Some(name) = req.name {
        zone.name = name;
    }
    if let Some(zone_type) = req.zone_type {
        zone.zone_type = zone_type;
    }
    if req.max_capacity.is_some() {
        zone.max_capacity = req.max_capacity;
    }
    if let Some(status) = req.status {
        zone.status = status;
    }

    state.db.update_zone(&zone)?;
    Ok(Json(zone))
}

pub async fn delete(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<()> {
    let deleted = state.db.delete_zone(&id)?;
    if !deleted {
        return Err(AppError::NotFound(format!("zone {id} not found")));
    }
    Ok(())
}

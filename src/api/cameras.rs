//! `POST /cameras/register`, `GET /cameras`, `GET /cameras/{id}`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::model::{Camera, CameraStatus};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterCameraRequest {
    pub camera_id: String,
    pub edge_node_id: String,
    pub location: String,
    pub resolution: (u32, u32),
    pub fps: f64,
}

#[derive(Debug, Serialize)]
pub struct CameraResponse {
    #[serde(flatten)]
    pub camera: Camera,
}

/// Idempotent on `camera_id`: a second registration updates the existing
/// record rather than failing with a conflict.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterCameraRequest>,
) -> AppResult<Json<Camera>> {
    if req.camera_id.trim().is_empty() {
        return Err(AppError::Validation("camera_id must not be empty".to_string()));
    }
    if req.resolution.0 == 0 || req.resolution.1 == 0 {
        return Err(AppError::Validation("resolution must be non-zero".to_string()));
    }

    let camera = Camera {
        id: req.camera_id,
        edge_id: req.edge_node_id,
        location: req.location,
        resolution: req.resolution,
        fps: req.fps,
        status: CameraStatus::Active,
        last_frame_time: None,
    };

    state.register_camera(&camera)?;
    if !state.cameras.contains(&camera.id) {
        let handle = crate::camera_worker::spawn(state.clone(), camera.id.clone());
        state.cameras.insert(&camera.id, handle);
    }

    Ok(Json(camera))
}

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Camera>>> {
    Ok(Json(state.db.list_cameras()?))
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> AppResult<Json<Camera>> {
    state
        .db
        .get_camera(&id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("camera {id} not found")))
}

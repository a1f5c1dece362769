//! HTTP/WS surface: one module per resource group, assembled into a single
//! `axum::Router` here. Route paths are bit-exact against the external
//! interface list (§6).

mod alerts;
mod analytics;
mod cameras;
mod frames;
mod health;
mod movements;
mod stream;
mod ws;
mod zones;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cameras/register", post(cameras::register))
        .route("/cameras", get(cameras::list))
        .route("/cameras/:id", get(cameras::get_one))
        .route("/cameras/:camera_id/snapshot", get(stream::snapshot))
        .route("/frames/upload", post(frames::upload))
        .route("/analytics/:camera_id/realtime", get(analytics::realtime))
        .route("/analytics/:camera_id/history", get(analytics::history))
        .route("/analytics/:camera_id/heatmap", get(analytics::heatmap))
        .route("/analytics/:camera_id/entry-exit", get(analytics::entry_exit))
        .route("/zones", post(zones::create))
        .route("/zones/:camera_id", get(zones::list_for_camera))
        .route("/zones/:id", put(zones::update).delete(zones::delete))
        .route("/alerts/active", get(alerts::active))
        .route("/alerts/:id/acknowledge", post(alerts::acknowledge))
        .route("/movements", get(movements::search))
        .route("/movements/camera/:id", get(movements::for_camera))
        .route("/movements/pair/:a/:b", get(movements::for_pair))
        .route("/movements/statistics", get(movements::statistics))
        .route("/health", get(health::health))
        .route("/stream/:camera_id", get(stream::stream))
        .route("/ws/frames", get(ws::frames))
        .route("/ws/dashboard/:camera_id", get(ws::dashboard))
        .route("/ws/alerts", get(ws::alerts))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

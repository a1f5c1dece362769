pub mod alerts;
pub mod analytics;
pub mod annotator;
pub mod api;
pub mod camera_worker;
pub mod config;
pub mod cross_camera;
pub mod db;
pub mod detector;
pub mod error;
pub mod frame_cache;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod push;
pub mod reid;
pub mod risk;
pub mod state;
pub mod tracker;
pub mod zones;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;

use config::AppConfig;
use db::Database;
use detector::YoloDetector;
use frame_cache::FrameCache;
use ingest::IngestRegistry;
use push::PushFabric;
use reid::FusionReid;
use state::{AppState, CameraRegistry};

/// Bootstrap every shared dependency, start the cross-camera matcher task
/// and a worker per already-registered camera, then serve the HTTP/WS API
/// until `Ctrl-C` or a fatal init error (model load, DB open) per §6's exit
/// code contract.
pub async fn serve(cfg: AppConfig) -> Result<()> {
    let db = Arc::new(Database::open(&cfg.database.path)?);

    let detector: Arc<dyn detector::Detector> = Arc::new(YoloDetector::new(
        &cfg.detector.model_path,
        cfg.detector.input_size,
        cfg.detector.confidence_threshold,
        cfg.detector.nms_threshold,
        cfg!(feature = "openvino"),
    )?);
    let reid: Arc<dyn reid::ReidExtractor> = Arc::new(FusionReid);

    let ingest = Arc::new(IngestRegistry::new());
    let cameras = Arc::new(CameraRegistry::new());
    let frame_cache = Arc::new(FrameCache::new(
        cfg.frame_cache.max_frames_per_camera,
        std::time::Duration::from_secs(cfg.frame_cache.ttl_secs),
    ));
    let push = Arc::new(PushFabric::new(cfg.push.subscriber_buffer, cfg.push.send_deadline_ms, cfg.push.max_consecutive_drops));

    let (cross_camera_tx, cross_camera_rx) = mpsc::channel(1024);

    let state = Arc::new(AppState {
        config: cfg.clone(),
        db: db.clone(),
        ingest: ingest.clone(),
        cameras: cameras.clone(),
        frame_cache,
        push,
        detector,
        reid,
        cross_camera_tx,
    });

    tokio::spawn(cross_camera::run(cross_camera_rx, db.clone(), cfg.cross_camera.window_secs, cfg.cross_camera.sim_threshold));

    for camera in db.list_cameras()? {
        if camera.status == model::CameraStatus::Active {
            ingest.register(&camera.id, cfg.ingest.queue_max);
            let handle = camera_worker::spawn(state.clone(), camera.id.clone());
            cameras.insert(&camera.id, handle);
        }
    }

    tracing::info!(bind = %cfg.server.bind, "crowdmon server starting");
    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await?;
    axum::serve(listener, api::router(state)).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("crowdmon server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

//! Server context: the explicit dependencies every worker and API handler
//! shares, replacing the teacher's single-camera `Pipeline` with a registry
//! of many (§9 design note "global singletons become explicit dependencies
//! held in a server context struct").

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

use crate::config::AppConfig;
use crate::cross_camera::ZoneCrossing;
use crate::db::Database;
use crate::detector::Detector;
use crate::frame_cache::FrameCache;
use crate::ingest::IngestRegistry;
use crate::model::{Camera, CameraStatus};
use crate::push::PushFabric;
use crate::reid::ReidExtractor;

/// One registered camera's live handle: the shutdown signal plus whatever
/// the worker task needs to be told to stop and be waited on.
pub struct CameraHandle {
    pub shutdown: watch::Sender<bool>,
    pub task: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Registry of camera handles, keyed by camera_id — the single point
/// through which cross-camera access to per-camera worker lifecycle goes
/// (§9 "registry keyed by camera_id with a read-write mutex"; `DashMap`
/// gives us that without a single global lock).
#[derive(Default)]
pub struct CameraRegistry {
    handles: DashMap<String, Arc<CameraHandle>>,
}

impl CameraRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, camera_id: &str, handle: Arc<CameraHandle>) {
        self.handles.insert(camera_id.to_string(), handle);
    }

    pub fn get(&self, camera_id: &str) -> Option<Arc<CameraHandle>> {
        self.handles.get(camera_id).map(|h| h.clone())
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.handles.contains_key(camera_id)
    }

    pub async fn shutdown(&self, camera_id: &str) {
        if let Some(handle) = self.get(camera_id) {
            let _ = handle.shutdown.send(true);
            if let Some(task) = handle.task.lock().await.take() {
                let _ = task.await;
            }
        }
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub db: Arc<Database>,
    pub ingest: Arc<IngestRegistry>,
    pub cameras: Arc<CameraRegistry>,
    pub frame_cache: Arc<FrameCache>,
    pub push: Arc<PushFabric>,
    pub detector: Arc<dyn Detector>,
    pub reid: Arc<dyn ReidExtractor>,
    pub cross_camera_tx: mpsc::Sender<ZoneCrossing>,
}

impl AppState {
    /// Register a camera record and ensure its ingest queue exists. Does
    /// not start a worker — callers that also want live processing call
    /// `camera_worker::spawn` separately so tests can register a camera
    /// without pulling in OpenCV/ONNX Runtime.
    pub fn register_camera(&self, camera: &Camera) -> anyhow::Result<()> {
        self.db.upsert_camera(camera)?;
        self.ingest.register(&camera.id, self.config.ingest.queue_max);
        Ok(())
    }

    pub fn camera_active(&self, camera_id: &str) -> bool {
        matches!(
            self.db.get_camera(camera_id).ok().flatten().map(|c| c.status),
            Some(CameraStatus::Active)
        )
    }
}

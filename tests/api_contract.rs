//! End-to-end HTTP contract tests against the real `axum::Router`, driven
//! through `tower::ServiceExt::oneshot` rather than a live socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use opencv::core::Mat;
use serde_json::{json, Value};
use tower::ServiceExt;

use crowdmon::detector::{Detection, Detector};
use crowdmon::frame_cache::FrameCache;
use crowdmon::ingest::IngestRegistry;
use crowdmon::model::BBox;
use crowdmon::push::PushFabric;
use crowdmon::reid::ReidExtractor;
use crowdmon::state::{AppState, CameraRegistry};

/// Never detects anything — the camera workers spawned by `/cameras/register`
/// just idle on the ingest queue in these tests, so this is never exercised.
struct NoopDetector;
impl Detector for NoopDetector {
    fn detect(&self, _frame: &Mat) -> Vec<Detection> {
        Vec::new()
    }
}

struct NoopReid;
impl ReidExtractor for NoopReid {
    fn extract(&self, _frame: &Mat, _bbox: &BBox) -> Option<Vec<f32>> {
        None
    }
}

fn test_state() -> Arc<AppState> {
    let config = crowdmon::config::default_config();
    let db = Arc::new(crowdmon::db::Database::open_in_memory().expect("open in-memory db"));
    let ingest = Arc::new(IngestRegistry::new());
    let cameras = Arc::new(CameraRegistry::new());
    let frame_cache = Arc::new(FrameCache::new(
        config.frame_cache.max_frames_per_camera,
        std::time::Duration::from_secs(config.frame_cache.ttl_secs),
    ));
    let push = Arc::new(PushFabric::new(config.push.subscriber_buffer, config.push.send_deadline_ms, config.push.max_consecutive_drops));
    let (cross_camera_tx, mut cross_camera_rx) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move { while cross_camera_rx.recv().await.is_some() {} });

    Arc::new(AppState {
        config,
        db,
        ingest,
        cameras,
        frame_cache,
        push,
        detector: Arc::new(NoopDetector),
        reid: Arc::new(NoopReid),
        cross_camera_tx,
    })
}

fn router() -> axum::Router {
    crowdmon::api::router(test_state())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let response = router().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db"], "up");
}

#[tokio::test]
async fn camera_register_is_idempotent_and_listable() {
    let app = router();
    let req = json_request(
        "POST",
        "/cameras/register",
        json!({
            "camera_id": "cam-1",
            "edge_node_id": "edge-a",
            "location": "lobby",
            "resolution": [1920, 1080],
            "fps": 15.0
        }),
    );
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "cam-1");
    assert_eq!(body["status"], "active");

    // Re-registering the same camera_id updates in place, not a 409.
    let req2 = json_request(
        "POST",
        "/cameras/register",
        json!({
            "camera_id": "cam-1",
            "edge_node_id": "edge-a",
            "location": "lobby door",
            "resolution": [1920, 1080],
            "fps": 15.0
        }),
    );
    let response2 = app.clone().oneshot(req2).await.unwrap();
    assert_eq!(response2.status(), StatusCode::OK);

    let list_response = app.clone().oneshot(get_request("/cameras")).await.unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let cameras = body_json(list_response).await;
    let cameras = cameras.as_array().unwrap();
    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0]["location"], "lobby door");
}

#[tokio::test]
async fn camera_register_rejects_empty_id() {
    let response = router()
        .oneshot(json_request(
            "POST",
            "/cameras/register",
            json!({
                "camera_id": "",
                "edge_node_id": "edge-a",
                "location": "lobby",
                "resolution": [1920, 1080],
                "fps": 15.0
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("camera_id"));
}

#[tokio::test]
async fn get_unknown_camera_returns_404() {
    let response = router().oneshot(get_request("/cameras/does-not-exist")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn zone_create_validates_polygon_and_is_listable() {
    let app = router();
    let too_few_points = json_request(
        "POST",
        "/zones",
        json!({
            "id": "zone-1",
            "camera_id": "cam-1",
            "name": "Entrance",
            "type": "entry",
            "polygon": [[0, 0], [10, 0]],
            "max_capacity": null
        }),
    );
    let response = app.clone().oneshot(too_few_points).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let valid = json_request(
        "POST",
        "/zones",
        json!({
            "id": "zone-1",
            "camera_id": "cam-1",
            "name": "Entrance",
            "type": "entry",
            "polygon": [[0, 0], [10, 0], [10, 10], [0, 10]],
            "max_capacity": 20
        }),
    );
    let response = app.clone().oneshot(valid).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Duplicate id is a conflict, not silently overwritten.
    let duplicate = json_request(
        "POST",
        "/zones",
        json!({
            "id": "zone-1",
            "camera_id": "cam-1",
            "name": "Entrance again",
            "type": "entry",
            "polygon": [[0, 0], [10, 0], [10, 10], [0, 10]],
            "max_capacity": null
        }),
    );
    let response = app.clone().oneshot(duplicate).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let list_response = app.clone().oneshot(get_request("/zones/cam-1")).await.unwrap();
    assert_eq!(list_response.status(), StatusCode::OK);
    let zones = body_json(list_response).await;
    assert_eq!(zones.as_array().unwrap().len(), 1);

    let delete_response = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri("/zones/zone-1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete_response.status(), StatusCode::OK);

    let delete_again = app
        .clone()
        .oneshot(Request::builder().method("DELETE").uri("/zones/zone-1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(delete_again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alerts_and_movements_start_empty() {
    let app = router();
    let alerts = app.clone().oneshot(get_request("/alerts/active")).await.unwrap();
    assert_eq!(alerts.status(), StatusCode::OK);
    assert_eq!(body_json(alerts).await.as_array().unwrap().len(), 0);

    let movements = app.clone().oneshot(get_request("/movements")).await.unwrap();
    assert_eq!(movements.status(), StatusCode::OK);
    assert_eq!(body_json(movements).await.as_array().unwrap().len(), 0);

    let stats = app.clone().oneshot(get_request("/movements/statistics")).await.unwrap();
    assert_eq!(stats.status(), StatusCode::OK);
    let stats = body_json(stats).await;
    assert_eq!(stats["total_movements"], 0);
}

#[tokio::test]
async fn alert_acknowledge_unknown_id_is_404() {
    let response = router().oneshot(get_request("/alerts/active")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let ack = router()
        .oneshot(Request::builder().method("POST").uri("/alerts/999/acknowledge").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(ack.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn snapshot_without_cached_frames_is_404() {
    let response = router().oneshot(get_request("/cameras/cam-1/snapshot")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

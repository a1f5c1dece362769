//! Push fabric: per-camera metrics topic + global alerts topic, each with
//! bounded per-subscriber buffers and the drop-then-disconnect policy from
//! §5/§4.9.
//!
//! Grounded on the teacher's `frigate_mqtt.rs` `tokio::select!` event-loop
//! shape (shutdown signal + inbound event source, translated to outbound
//! messages with best-effort delivery and quiet cleanup on send failure),
//! generalized here to many producers and many subscriber buffers instead of
//! one external MQTT source feeding one Tauri `emit` sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{Alert, AnalyticsSample};

#[derive(Debug, Clone, Serialize)]
pub struct MetricsPush {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub camera_id: String,
    pub data: AnalyticsSample,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPush {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub alert: Alert,
}

/// One topic's subscriber set, applying the shared delivery policy: a
/// bounded `mpsc` per subscriber, `send_deadline` to wait for room before
/// giving up, and disconnect after `max_consecutive_drops`.
pub struct Topic<T: Clone + Send + 'static> {
    subscribers: DashMap<u64, mpsc::Sender<T>>,
    drop_streaks: DashMap<u64, u32>,
    next_id: AtomicU64,
    buffer: usize,
    send_deadline: Duration,
    max_consecutive_drops: u32,
    pub dropped_total: AtomicU64,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(buffer: usize, send_deadline_ms: u64, max_consecutive_drops: u32) -> Self {
        Self {
            subscribers: DashMap::new(),
            drop_streaks: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer,
            send_deadline: Duration::from_millis(send_deadline_ms),
            max_consecutive_drops,
            dropped_total: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, tx);
        self.drop_streaks.insert(id, 0);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
        self.drop_streaks.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Fan out one event to every live subscriber, applying the deadline/
    /// drop/disconnect policy per subscriber independently — one slow
    /// subscriber never blocks delivery to the others.
    pub async fn publish(&self, event: T) {
        let targets: Vec<(u64, mpsc::Sender<T>)> =
            self.subscribers.iter().map(|e| (*e.key(), e.value().clone())).collect();

        let mut to_disconnect = Vec::new();
        for (id, tx) in targets {
            let delivered = tokio::time::timeout(self.send_deadline, tx.send(event.clone())).await;
            match delivered {
                Ok(Ok(())) => {
                    self.drop_streaks.insert(id, 0);
                }
                _ => {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    let streak = {
                        let mut entry = self.drop_streaks.entry(id).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    if streak >= self.max_consecutive_drops {
                        to_disconnect.push(id);
                    }
                }
            }
        }
        for id in to_disconnect {
            tracing::warn!(subscriber = id, "push subscriber disconnected after repeated drops");
            self.unsubscribe(id);
        }
    }
}

/// Two logical topics per §4.9: one metrics stream per camera, one global
/// alerts stream.
pub struct PushFabric {
    metrics: DashMap<String, std::sync::Arc<Topic<MetricsPush>>>,
    alerts: std::sync::Arc<Topic<AlertPush>>,
    buffer: usize,
    send_deadline_ms: u64,
    max_consecutive_drops: u32,
}

impl PushFabric {
    pub fn new(buffer: usize, send_deadline_ms: u64, max_consecutive_drops: u32) -> Self {
        Self {
            metrics: DashMap::new(),
            alerts: std::sync::Arc::new(Topic::new(buffer, send_deadline_ms, max_consecutive_drops)),
            buffer,
            send_deadline_ms,
            max_consecutive_drops,
        }
    }

    fn metrics_topic(&self, camera_id: &str) -> std::sync::Arc<Topic<MetricsPush>> {
        self.metrics
            .entry(camera_id.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(Topic::new(self.buffer, self.send_deadline_ms, self.max_consecutive_drops))
            })
            .clone()
    }

    pub fn subscribe_metrics(&self, camera_id: &str) -> (u64, mpsc::Receiver<MetricsPush>) {
        self.metrics_topic(camera_id).subscribe()
    }

    pub fn unsubscribe_metrics(&self, camera_id: &str, id: u64) {
        if let Some(topic) = self.metrics.get(camera_id) {
            topic.unsubscribe(id);
        }
    }

    pub fn subscribe_alerts(&self) -> (u64, mpsc::Receiver<AlertPush>) {
        self.alerts.subscribe()
    }

    pub fn unsubscribe_alerts(&self, id: u64) {
        self.alerts.unsubscribe(id);
    }

    pub async fn publish_metrics(&self, camera_id: &str, sample: AnalyticsSample) {
        let topic = self.metrics_topic(camera_id);
        topic
            .publish(MetricsPush {
                kind: "metrics",
                camera_id: camera_id.to_string(),
                data: sample,
                timestamp: Utc::now(),
            })
            .await;
    }

    pub async fn publish_alert(&self, alert: Alert) {
        self.alerts.publish(AlertPush { kind: "alert", alert }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CongestionLevel, RiskLevel};

    fn sample() -> AnalyticsSample {
        AnalyticsSample {
            camera_id: "cam0".to_string(),
            timestamp: Utc::now(),
            people_count: 1,
            density: 0.1,
            avg_speed: 0.0,
            flow: (0.0, 0.0),
            congestion: CongestionLevel::Low,
            risk_score: 0.1,
            risk_level: RiskLevel::Normal,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_emission_order() {
        let topic: Topic<u32> = Topic::new(8, 1000, 3);
        let (_, mut rx) = topic.subscribe();
        topic.publish(1).await;
        topic.publish(2).await;
        topic.publish(3).await;
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn full_buffer_drops_and_increments_counter() {
        let topic: Topic<u32> = Topic::new(1, 20, 5);
        let (_, _rx) = topic.subscribe(); // never drained
        topic.publish(1).await; // fills the one slot
        topic.publish(2).await; // times out, dropped
        assert_eq!(topic.dropped_total.load(Ordering::Relaxed), 1);
        assert_eq!(topic.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn disconnects_after_max_consecutive_drops() {
        let topic: Topic<u32> = Topic::new(1, 5, 2);
        let (_, _rx) = topic.subscribe();
        topic.publish(1).await; // fills slot, accepted
        topic.publish(2).await; // drop 1
        topic.publish(3).await; // drop 2 -> disconnect
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn fabric_publishes_metrics_to_camera_specific_topic() {
        let fabric = PushFabric::new(8, 1000, 3);
        let (_, mut rx) = fabric.subscribe_metrics("cam0");
        fabric.publish_metrics("cam0", sample()).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.camera_id, "cam0");
        assert_eq!(received.kind, "metrics");
    }
}

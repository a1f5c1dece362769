//! Cross-camera matcher: an async consumer of entry/exit events, never
//! inline with ingest (§9 design note), matching exits on one camera to
//! later entries on another via re-id cosine similarity (§4.8).
//!
//! Grounded on the teacher's async-worker-channel split in `pipeline.rs`
//! (a blocking producer feeding an async consumer over `tokio::sync::mpsc`)
//! generalized here from "completed track -> LLM batch" to "zone event ->
//! movement match".

use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::db::Database;
use crate::model::{CrossCameraMovement, EventKind, MatchConfidence};
use crate::reid::cosine_similarity;

/// One zone-crossing event carrying the track's current embedding, handed
/// from a camera worker to the matcher task.
#[derive(Debug, Clone)]
pub struct ZoneCrossing {
    pub camera_id: String,
    pub zone_id: String,
    pub track_id: u64,
    pub kind: EventKind,
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Short-lived in-memory index of recent crossings, pruned to the
/// configured window. A new `entry` event searches backward through stored
/// `exit` events; a new `exit` event is simply retained so a *future* entry
/// on another camera can find it — this one-directional search already
/// covers the symmetric rule from §4.8, since every forward-looking match
/// is realized as a backward search once the later event arrives.
pub struct CrossCameraMatcher {
    window: VecDeque<ZoneCrossing>,
    window_secs: i64,
    sim_threshold: f32,
}

impl CrossCameraMatcher {
    pub fn new(window_secs: i64, sim_threshold: f32) -> Self {
        Self { window: VecDeque::new(), window_secs, sim_threshold }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - ChronoDuration::seconds(self.window_secs);
        while let Some(front) = self.window.front() {
            if front.timestamp < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Process one crossing, returning a movement record if it closes a
    /// match. Caller persists the result.
    pub fn process(&mut self, event: ZoneCrossing) -> Option<CrossCameraMovement> {
        self.prune(event.timestamp);

        let movement = if event.kind == EventKind::Entry {
            self.best_match(&event)
        } else {
            None
        };

        self.window.push_back(event);
        movement
    }

    fn best_match(&self, entry: &ZoneCrossing) -> Option<CrossCameraMovement> {
        let mut best: Option<(&ZoneCrossing, f32)> = None;

        for candidate in self.window.iter() {
            if candidate.kind != EventKind::Exit || candidate.camera_id == entry.camera_id {
                continue;
            }
            if candidate.timestamp > entry.timestamp {
                continue;
            }
            let dt = entry.timestamp - candidate.timestamp;
            if dt > ChronoDuration::seconds(self.window_secs) {
                continue;
            }

            let sim = cosine_similarity(&entry.embedding, &candidate.embedding);
            if sim < self.sim_threshold {
                continue;
            }

            let better = match best {
                None => true,
                Some((best_cand, best_sim)) => {
                    if sim > best_sim {
                        true
                    } else if (sim - best_sim).abs() < 1e-6 {
                        let cur_dt = (entry.timestamp - candidate.timestamp).num_milliseconds().abs();
                        let best_dt = (entry.timestamp - best_cand.timestamp).num_milliseconds().abs();
                        cur_dt < best_dt
                    } else {
                        false
                    }
                }
            };
            if better {
                best = Some((candidate, sim));
            }
        }

        best.map(|(exit_event, sim)| {
            let duration_s =
                (entry.timestamp - exit_event.timestamp).num_milliseconds() as f64 / 1000.0;
            CrossCameraMovement {
                entry_camera: entry.camera_id.clone(),
                entry_zone: Some(entry.zone_id.clone()),
                entry_track: entry.track_id,
                entry_ts: entry.timestamp,
                exit_camera: exit_event.camera_id.clone(),
                exit_zone: Some(exit_event.zone_id.clone()),
                exit_track: exit_event.track_id,
                exit_ts: exit_event.timestamp,
                similarity: sim,
                confidence: MatchConfidence::from_similarity(sim),
                duration_s,
            }
        })
    }
}

/// Drains a channel of crossings, matching and persisting movements until
/// the channel closes (camera worker shutdown draining / process exit).
pub async fn run(
    mut events: tokio::sync::mpsc::Receiver<ZoneCrossing>,
    db: std::sync::Arc<Database>,
    window_secs: i64,
    sim_threshold: f32,
) {
    let mut matcher = CrossCameraMatcher::new(window_secs, sim_threshold);
    while let Some(event) = events.recv().await {
        if let Some(movement) = matcher.process(event) {
            if let Err(err) = db.upsert_movement(&movement) {
                tracing::warn!("cross-camera movement persist failed: {:#}", err);
            } else {
                tracing::info!(
                    entry_camera = %movement.entry_camera,
                    exit_camera = %movement.exit_camera,
                    similarity = movement.similarity,
                    "cross-camera movement matched"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crossing(camera: &str, zone: &str, track: u64, kind: EventKind, emb: Vec<f32>, t: DateTime<Utc>) -> ZoneCrossing {
        ZoneCrossing { camera_id: camera.to_string(), zone_id: zone.to_string(), track_id: track, kind, embedding: emb, timestamp: t }
    }

    #[test]
    fn exit_then_later_entry_on_other_camera_matches() {
        let mut matcher = CrossCameraMatcher::new(600, 0.70);
        let t0 = Utc::now();
        let exit = crossing("cam_A", "z1", 1, EventKind::Exit, vec![1.0, 0.0], t0);
        assert!(matcher.process(exit).is_none());

        let t1 = t0 + ChronoDuration::seconds(120);
        let entry = crossing("cam_B", "z2", 7, EventKind::Entry, vec![1.0, 0.0], t1);
        let movement = matcher.process(entry).expect("expected a match");

        assert_eq!(movement.exit_camera, "cam_A");
        assert_eq!(movement.entry_camera, "cam_B");
        assert!(movement.similarity >= 0.70);
        assert!((movement.duration_s - 120.0).abs() < 1e-6);
        assert_eq!(movement.confidence, MatchConfidence::High);
    }

    #[test]
    fn same_camera_exit_and_entry_never_match() {
        let mut matcher = CrossCameraMatcher::new(600, 0.70);
        let t0 = Utc::now();
        matcher.process(crossing("cam_A", "z1", 1, EventKind::Exit, vec![1.0, 0.0], t0));
        let entry = crossing("cam_A", "z2", 1, EventKind::Entry, vec![1.0, 0.0], t0 + ChronoDuration::seconds(5));
        assert!(matcher.process(entry).is_none());
    }

    #[test]
    fn exit_outside_window_is_not_matched() {
        let mut matcher = CrossCameraMatcher::new(600, 0.70);
        let t0 = Utc::now();
        matcher.process(crossing("cam_A", "z1", 1, EventKind::Exit, vec![1.0, 0.0], t0));
        let entry = crossing("cam_B", "z2", 7, EventKind::Entry, vec![1.0, 0.0], t0 + ChronoDuration::seconds(601));
        assert!(matcher.process(entry).is_none());
    }

    #[test]
    fn low_similarity_below_threshold_is_not_matched() {
        let mut matcher = CrossCameraMatcher::new(600, 0.70);
        let t0 = Utc::now();
        matcher.process(crossing("cam_A", "z1", 1, EventKind::Exit, vec![1.0, 0.0], t0));
        let entry = crossing("cam_B", "z2", 7, EventKind::Entry, vec![0.0, 1.0], t0 + ChronoDuration::seconds(5));
        assert!(matcher.process(entry).is_none());
    }

    #[test]
    fn best_candidate_wins_on_highest_similarity() {
        let mut matcher = CrossCameraMatcher::new(600, 0.70);
        let t0 = Utc::now();
        // Lower-similarity exit on cam_A, higher-similarity exit on cam_C.
        matcher.process(crossing("cam_A", "z1", 1, EventKind::Exit, vec![0.80, 0.6], t0));
        matcher.process(crossing("cam_C", "z1", 2, EventKind::Exit, vec![1.0, 0.0], t0 + ChronoDuration::seconds(1)));
        let entry = crossing("cam_B", "z2", 7, EventKind::Entry, vec![1.0, 0.0], t0 + ChronoDuration::seconds(10));
        let movement = matcher.process(entry).unwrap();
        assert_eq!(movement.exit_camera, "cam_C");
    }
}

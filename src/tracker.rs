//! Per-camera multi-object tracker.
//!
//! Two-stage greedy IoU matching. Tracks progress `tentative -> confirmed`
//! at `MinHits` hits and `-> terminated` at `MaxAge` consecutive misses.
//! State is private to the camera worker that owns this tracker — per design
//! note §9, cross-camera access never reaches inside here.

use chrono::{DateTime, Utc};

use crate::detector::{iou, Detection};
use crate::model::{BBox, Track, TrackState};

struct ActiveTrack {
    track_id: u64,
    bbox: BBox,
    confidence_sum: f32,
    total_frames: u32,
    misses: u32,
    state: TrackState,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    embedding: Option<Vec<f32>>,
}

impl ActiveTrack {
    fn avg_confidence(&self) -> f32 {
        self.confidence_sum / self.total_frames as f32
    }

    fn snapshot(&self, camera_id: &str) -> Track {
        Track {
            track_id: self.track_id,
            camera_id: camera_id.to_string(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            total_frames: self.total_frames,
            avg_confidence: self.avg_confidence(),
            state: self.state,
            bbox: self.bbox,
            embedding: self.embedding.clone(),
        }
    }
}

pub struct Tracker {
    camera_id: String,
    tracks: Vec<ActiveTrack>,
    next_track_id: u64,
    iou_threshold: f32,
    max_age: u32,
    min_hits: u32,
    terminated_this_update: Vec<u64>,
}

impl Tracker {
    pub fn new(camera_id: impl Into<String>, iou_threshold: f32, max_age: u32, min_hits: u32) -> Self {
        Self {
            camera_id: camera_id.into(),
            tracks: Vec::new(),
            next_track_id: 1,
            iou_threshold,
            max_age,
            min_hits,
            terminated_this_update: Vec::new(),
        }
    }

    /// Track ids that crossed into `Terminated` during the most recent
    /// `update` call — callers use this to drop per-track bookkeeping held
    /// in other stages (zone membership, analytics history).
    pub fn terminated_this_update(&self) -> &[u64] {
        &self.terminated_this_update
    }

    /// Store the latest re-id embedding for a confirmed track. No-op if the
    /// track id is unknown (it may have just terminated).
    pub fn set_embedding(&mut self, track_id: u64, embedding: Vec<f32>) {
        if let Some(t) = self.tracks.iter_mut().find(|t| t.track_id == track_id) {
            t.embedding = Some(embedding);
        }
    }

    pub fn active_bbox(&self, track_id: u64) -> Option<BBox> {
        self.tracks.iter().find(|t| t.track_id == track_id).map(|t| t.bbox)
    }

    pub fn embedding(&self, track_id: u64) -> Option<Vec<f32>> {
        self.tracks.iter().find(|t| t.track_id == track_id).and_then(|t| t.embedding.clone())
    }

    /// Advance the tracker by one frame. Returns every `confirmed` track's
    /// current snapshot — tentative/lost/terminated tracks are never handed
    /// to downstream stages.
    pub fn update(&mut self, detections: &[Detection], frame_ts: DateTime<Utc>) -> Vec<Track> {
        let mut used_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let overlap = iou(&track.bbox, &det.bbox);
                if overlap >= self.iou_threshold {
                    pairs.push((ti, di, overlap));
                }
            }
        }
        // Descending IoU; tie-break by higher detection confidence, then
        // lower track_id (stable order from `self.tracks` iteration already
        // gives us ascending track_id for equal (iou, confidence)).
        pairs.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap()
                .then_with(|| {
                    detections[b.1]
                        .confidence
                        .partial_cmp(&detections[a.1].confidence)
                        .unwrap()
                })
                .then_with(|| self.tracks[a.0].track_id.cmp(&self.tracks[b.0].track_id))
        });

        for (ti, di, _) in pairs {
            if matched_track[ti] || used_det[di] {
                continue;
            }
            matched_track[ti] = true;
            used_det[di] = true;

            let det = &detections[di];
            let track = &mut self.tracks[ti];
            track.bbox = det.bbox;
            track.confidence_sum += det.confidence;
            track.total_frames += 1;
            track.misses = 0;
            track.last_seen = frame_ts;
            if track.state == TrackState::Tentative && track.total_frames >= self.min_hits {
                track.state = TrackState::Confirmed;
            } else if track.state == TrackState::Lost {
                track.state = TrackState::Confirmed;
            }
        }

        for (di, det) in detections.iter().enumerate() {
            if used_det[di] {
                continue;
            }
            let track_id = self.next_track_id;
            self.next_track_id += 1;
            self.tracks.push(ActiveTrack {
                track_id,
                bbox: det.bbox,
                confidence_sum: det.confidence,
                total_frames: 1,
                misses: 0,
                state: TrackState::Tentative,
                first_seen: frame_ts,
                last_seen: frame_ts,
                embedding: None,
            });
        }

        self.terminated_this_update.clear();
        let mut retained = Vec::with_capacity(self.tracks.len());
        for (ti, mut track) in self.tracks.drain(..).enumerate() {
            if !matched_track.get(ti).copied().unwrap_or(false) {
                track.misses += 1;
                if track.state == TrackState::Confirmed && track.misses > 0 {
                    track.state = TrackState::Lost;
                }
            }
            if track.misses >= self.max_age {
                track.state = TrackState::Terminated;
                tracing::debug!(
                    camera_id = %self.camera_id,
                    track_id = track.track_id,
                    total_frames = track.total_frames,
                    "track terminated"
                );
                self.terminated_this_update.push(track.track_id);
                // dropped — terminated tracks never re-emerge under the same id
            } else {
                retained.push(track);
            }
        }
        self.tracks = retained;

        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed)
            .map(|t| t.snapshot(&self.camera_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, conf: f32) -> Detection {
        Detection { bbox: BBox { x, y, w: 20.0, h: 40.0 }, confidence: conf }
    }

    #[test]
    fn track_confirms_after_min_hits() {
        let mut tracker = Tracker::new("cam0", 0.3, 30, 3);
        let now = Utc::now();
        assert!(tracker.update(&[det(0.0, 0.0, 0.9)], now).is_empty());
        assert!(tracker.update(&[det(1.0, 0.0, 0.9)], now).is_empty());
        let confirmed = tracker.update(&[det(2.0, 0.0, 0.9)], now);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].track_id, 1);
        assert_eq!(confirmed[0].total_frames, 3);
    }

    #[test]
    fn unmatched_confirmed_track_terminates_after_max_age() {
        let mut tracker = Tracker::new("cam0", 0.3, 2, 3);
        let now = Utc::now();
        tracker.update(&[det(0.0, 0.0, 0.9)], now);
        tracker.update(&[det(0.0, 0.0, 0.9)], now);
        let confirmed = tracker.update(&[det(0.0, 0.0, 0.9)], now);
        assert_eq!(confirmed.len(), 1);

        // Now the track stops being detected; after `max_age` misses it must
        // vanish from confirmed output and never return under the same id.
        assert!(tracker.update(&[], now).is_empty());
        assert!(tracker.update(&[], now).is_empty());
        assert!(tracker.update(&[], now).is_empty());

        let reappear = tracker.update(&[det(0.0, 0.0, 0.9)], now);
        assert_eq!(reappear.len(), 0); // tentative again, not yet re-confirmed
        assert_ne!(tracker.next_track_id, 1, "a new id must be allocated, not id 1 reused");
    }

    #[test]
    fn lost_track_recovers_to_confirmed_on_rematch() {
        let mut tracker = Tracker::new("cam0", 0.3, 5, 3);
        let now = Utc::now();
        tracker.update(&[det(0.0, 0.0, 0.9)], now);
        tracker.update(&[det(0.0, 0.0, 0.9)], now);
        let confirmed = tracker.update(&[det(0.0, 0.0, 0.9)], now);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].track_id, 1);

        // Miss one frame: track goes Lost and drops out of confirmed output,
        // but max_age (5) hasn't been reached yet.
        assert!(tracker.update(&[], now).is_empty());

        // Re-detected before max_age: must come back as Confirmed under the
        // same track id, not restart as a new Tentative track.
        let recovered = tracker.update(&[det(0.0, 0.0, 0.9)], now);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].track_id, 1);
        assert_eq!(recovered[0].state, TrackState::Confirmed);
    }

    #[test]
    fn terminated_track_id_surfaces_exactly_once() {
        let mut tracker = Tracker::new("cam0", 0.3, 2, 1);
        let now = Utc::now();
        tracker.update(&[det(0.0, 0.0, 0.9)], now);
        assert!(tracker.terminated_this_update().is_empty());

        tracker.update(&[], now);
        assert!(tracker.terminated_this_update().is_empty());
        tracker.update(&[], now);
        assert_eq!(tracker.terminated_this_update(), &[1]);

        // Termination is reported only on the update that causes it.
        let after = tracker.update(&[], now);
        assert!(after.is_empty());
        assert!(tracker.terminated_this_update().is_empty());
    }

    #[test]
    fn new_detection_allocates_strictly_increasing_track_id() {
        let mut tracker = Tracker::new("cam0", 0.3, 30, 1);
        let now = Utc::now();
        let a = tracker.update(&[det(0.0, 0.0, 0.9)], now);
        let b = tracker.update(&[det(0.0, 0.0, 0.9), det(500.0, 500.0, 0.9)], now);
        assert_eq!(a[0].track_id, 1);
        let ids: Vec<u64> = b.iter().map(|t| t.track_id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
    }
}

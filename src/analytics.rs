//! Per-frame crowd analytics: density, speed, flow, congestion.
//!
//! Generalizes the teacher's single-track `analyse_movement` (fixed 3x3
//! grid labels, one track at a time — see `movement.rs`) into per-frame
//! aggregate statistics over every confirmed track on a camera.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{AnalyticsSample, CongestionLevel, Track};

/// Per-track motion derived this frame, handed to the risk stage so it
/// never needs its own position-history bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct TrackMotion {
    pub track_id: u64,
    pub speed: f32,
    pub velocity: (f32, f32),
    /// `|speed_cur - speed_prev|`; 0.0 on a track's first observed frame.
    pub speed_delta: f32,
}

pub struct AnalyticsResult {
    pub people_count: u32,
    pub density: f32,
    pub avg_speed: f32,
    pub flow: (f32, f32),
    pub congestion: CongestionLevel,
    pub motions: Vec<TrackMotion>,
}

/// Tracks per-track position/speed history so speed, flow, and the risk
/// stage's `sudden_movement` factor can be computed frame over frame.
/// Private to the camera worker, matching the teacher's single-writer
/// per-camera state idiom.
#[derive(Default)]
pub struct AnalyticsEngine {
    prev_position: HashMap<u64, ((f32, f32), DateTime<Utc>)>,
    prev_speed: HashMap<u64, f32>,
}

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forget_track(&mut self, track_id: u64) {
        self.prev_position.remove(&track_id);
        self.prev_speed.remove(&track_id);
    }

    pub fn compute(
        &mut self,
        tracks: &[Track],
        now: DateTime<Utc>,
        density_norm: f32,
        density_bandwidth_px: f32,
    ) -> AnalyticsResult {
        let people_count = tracks.len() as u32;

        let mut motions = Vec::with_capacity(tracks.len());
        let mut velocities: Vec<(f32, f32)> = Vec::with_capacity(tracks.len());
        let mut speeds: Vec<f32> = Vec::with_capacity(tracks.len());

        for track in tracks {
            let center = track.bbox.center();
            let (velocity, speed) = match self.prev_position.get(&track.track_id) {
                Some((prev_center, prev_ts)) => {
                    let dt = (now - *prev_ts).num_milliseconds() as f32 / 1000.0;
                    if dt > 0.0 {
                        let vx = (center.0 - prev_center.0) / dt;
                        let vy = (center.1 - prev_center.1) / dt;
                        ((vx, vy), (vx * vx + vy * vy).sqrt())
                    } else {
                        ((0.0, 0.0), 0.0)
                    }
                }
                None => ((0.0, 0.0), 0.0),
            };

            let prev_speed = self.prev_speed.get(&track.track_id).copied().unwrap_or(0.0);
            let speed_delta = (speed - prev_speed).abs();

            motions.push(TrackMotion { track_id: track.track_id, speed, velocity, speed_delta });
            velocities.push(velocity);
            speeds.push(speed);

            self.prev_position.insert(track.track_id, (center, now));
            self.prev_speed.insert(track.track_id, speed);
        }

        let avg_speed = if speeds.is_empty() { 0.0 } else { speeds.iter().sum::<f32>() / speeds.len() as f32 };

        let flow = if velocities.is_empty() {
            (0.0, 0.0)
        } else {
            let sum_x: f32 = velocities.iter().map(|v| v.0).sum();
            let sum_y: f32 = velocities.iter().map(|v| v.1).sum();
            let mean = (sum_x / velocities.len() as f32, sum_y / velocities.len() as f32);
            let norm = (mean.0 * mean.0 + mean.1 * mean.1).sqrt();
            if norm > 1e-6 {
                (mean.0 / norm, mean.1 / norm)
            } else {
                (0.0, 0.0)
            }
        };

        let density = gaussian_density(tracks, density_bandwidth_px) / density_norm.max(1e-6);
        let density = density.clamp(0.0, 1.0);

        let congestion = if density < 0.33 {
            CongestionLevel::Low
        } else if density < 0.66 {
            CongestionLevel::Medium
        } else {
            CongestionLevel::High
        };

        AnalyticsResult { people_count, density, avg_speed, flow, congestion, motions }
    }
}

/// Gaussian-kernel crowd density estimate: sum of pairwise proximity
/// kernels between confirmed track centers. Zero or one track yields 0.
fn gaussian_density(tracks: &[Track], bandwidth_px: f32) -> f32 {
    if tracks.len() < 2 {
        return 0.0;
    }
    let sigma2 = 2.0 * bandwidth_px * bandwidth_px;
    let mut sum = 0.0f32;
    for i in 0..tracks.len() {
        for j in (i + 1)..tracks.len() {
            let (ax, ay) = tracks[i].bbox.center();
            let (bx, by) = tracks[j].bbox.center();
            let d2 = (ax - bx).powi(2) + (ay - by).powi(2);
            sum += (-d2 / sigma2).exp();
        }
    }
    sum
}

pub fn empty_sample(camera_id: &str, timestamp: DateTime<Utc>) -> AnalyticsSample {
    AnalyticsSample {
        camera_id: camera_id.to_string(),
        timestamp,
        people_count: 0,
        density: 0.0,
        avg_speed: 0.0,
        flow: (0.0, 0.0),
        congestion: CongestionLevel::Low,
        risk_score: 0.0,
        risk_level: crate::model::RiskLevel::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BBox, TrackState};

    fn track(id: u64, x: f32) -> Track {
        Track {
            track_id: id,
            camera_id: "cam0".to_string(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            total_frames: 3,
            avg_confidence: 0.9,
            state: TrackState::Confirmed,
            bbox: BBox { x, y: 0.0, w: 20.0, h: 40.0 },
            embedding: None,
        }
    }

    #[test]
    fn zero_tracks_is_the_boundary_case() {
        let mut engine = AnalyticsEngine::new();
        let result = engine.compute(&[], Utc::now(), 15.0, 80.0);
        assert_eq!(result.people_count, 0);
        assert_eq!(result.density, 0.0);
        assert_eq!(result.flow, (0.0, 0.0));
        assert_eq!(result.congestion, CongestionLevel::Low);
    }

    #[test]
    fn single_track_has_zero_density() {
        let mut engine = AnalyticsEngine::new();
        let result = engine.compute(&[track(1, 0.0)], Utc::now(), 15.0, 80.0);
        assert_eq!(result.people_count, 1);
        assert_eq!(result.density, 0.0);
    }

    #[test]
    fn moving_track_yields_nonzero_speed_on_second_frame() {
        let mut engine = AnalyticsEngine::new();
        let t0 = Utc::now();
        engine.compute(&[track(1, 0.0)], t0, 15.0, 80.0);
        let t1 = t0 + chrono::Duration::milliseconds(500);
        let result = engine.compute(&[track(1, 50.0)], t1, 15.0, 80.0);
        assert!(result.avg_speed > 0.0);
        assert!(result.motions[0].speed_delta > 0.0);
    }
}

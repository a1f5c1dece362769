//! Risk scoring: the weighted sum of five normalized crowd-safety factors.
//!
//! Grounded on the `RiskAnalyzer` pattern (compute a weighted score, compare
//! against fixed thresholds, hand off to alerting) from the retail-
//! surveillance reference pipeline, generalized here from POS-triggered
//! scoring to the five density/motion factors this system tracks.

use crate::analytics::{AnalyticsResult, TrackMotion};
use crate::model::{CongestionLevel, RiskLevel};

const W_DENSITY: f32 = 0.30;
const W_SPEED_VARIANCE: f32 = 0.25;
const W_CONGESTION: f32 = 0.20;
const W_DIRECTIONAL_CONFLICT: f32 = 0.15;
const W_SUDDEN_MOVEMENT: f32 = 0.10;

pub struct RiskFactors {
    pub density: f32,
    pub speed_variance: f32,
    pub congestion: f32,
    pub directional_conflict: f32,
    pub sudden_movement: f32,
}

pub fn compute_risk(
    analytics: &AnalyticsResult,
    reference_speed: f32,
    speed_jump_threshold: f32,
) -> (f32, RiskLevel, RiskFactors) {
    let factors = RiskFactors {
        density: analytics.density.clamp(0.0, 1.0),
        speed_variance: speed_variance(&analytics.motions, reference_speed),
        congestion: congestion_factor(analytics.congestion),
        directional_conflict: directional_conflict(&analytics.motions),
        sudden_movement: sudden_movement_fraction(&analytics.motions, speed_jump_threshold),
    };

    let score = W_DENSITY * factors.density
        + W_SPEED_VARIANCE * factors.speed_variance
        + W_CONGESTION * factors.congestion
        + W_DIRECTIONAL_CONFLICT * factors.directional_conflict
        + W_SUDDEN_MOVEMENT * factors.sudden_movement;
    let score = score.clamp(0.0, 1.0);

    (score, RiskLevel::from_score(score), factors)
}

fn congestion_factor(level: CongestionLevel) -> f32 {
    match level {
        CongestionLevel::Low => 0.0,
        CongestionLevel::Medium => 0.5,
        CongestionLevel::High => 1.0,
    }
}

fn speed_variance(motions: &[TrackMotion], reference_speed: f32) -> f32 {
    if motions.len() < 2 {
        return 0.0;
    }
    let mean = motions.iter().map(|m| m.speed).sum::<f32>() / motions.len() as f32;
    let variance =
        motions.iter().map(|m| (m.speed - mean).powi(2)).sum::<f32>() / motions.len() as f32;
    let std = variance.sqrt();
    (std / reference_speed.max(1e-6)).clamp(0.0, 1.0)
}

fn directional_conflict(motions: &[TrackMotion]) -> f32 {
    if motions.is_empty() {
        return 0.0;
    }
    let unit_velocities: Vec<(f32, f32)> = motions
        .iter()
        .filter_map(|m| {
            let n = (m.velocity.0 * m.velocity.0 + m.velocity.1 * m.velocity.1).sqrt();
            if n > 1e-6 {
                Some((m.velocity.0 / n, m.velocity.1 / n))
            } else {
                None
            }
        })
        .collect();
    if unit_velocities.is_empty() {
        return 0.0;
    }
    let sum_x: f32 = unit_velocities.iter().map(|v| v.0).sum();
    let sum_y: f32 = unit_velocities.iter().map(|v| v.1).sum();
    let n = unit_velocities.len() as f32;
    let mean_norm = ((sum_x / n).powi(2) + (sum_y / n).powi(2)).sqrt();
    (1.0 - mean_norm).clamp(0.0, 1.0)
}

fn sudden_movement_fraction(motions: &[TrackMotion], threshold: f32) -> f32 {
    if motions.is_empty() {
        return 0.0;
    }
    let jumps = motions.iter().filter(|m| m.speed_delta > threshold).count();
    jumps as f32 / motions.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsResult;

    fn empty_analytics() -> AnalyticsResult {
        AnalyticsResult {
            people_count: 0,
            density: 0.0,
            avg_speed: 0.0,
            flow: (0.0, 0.0),
            congestion: CongestionLevel::Low,
            motions: vec![],
        }
    }

    #[test]
    fn zero_tracks_yields_zero_risk_and_normal_level() {
        let analytics = empty_analytics();
        let (score, level, _) = compute_risk(&analytics, 1.5, 0.8);
        assert_eq!(score, 0.0);
        assert_eq!(level, RiskLevel::Normal);
    }

    #[test]
    fn single_track_has_zero_speed_variance_and_directional_conflict() {
        let mut analytics = empty_analytics();
        analytics.people_count = 1;
        analytics.motions =
            vec![TrackMotion { track_id: 1, speed: 1.0, velocity: (1.0, 0.0), speed_delta: 0.0 }];
        let (_, _, factors) = compute_risk(&analytics, 1.5, 0.8);
        assert_eq!(factors.speed_variance, 0.0);
        assert_eq!(factors.directional_conflict, 0.0);
    }

    #[test]
    fn risk_level_thresholds_at_0_4_and_0_7() {
        assert_eq!(RiskLevel::from_score(0.39), RiskLevel::Normal);
        assert_eq!(RiskLevel::from_score(0.40), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(0.69), RiskLevel::Warning);
        assert_eq!(RiskLevel::from_score(0.70), RiskLevel::Critical);
    }

    #[test]
    fn high_density_dominates_score_via_its_weight() {
        let mut analytics = empty_analytics();
        analytics.density = 1.0;
        analytics.congestion = CongestionLevel::High;
        let (score, level, _) = compute_risk(&analytics, 1.5, 0.8);
        assert!((score - 0.5).abs() < 1e-6); // 0.30*1 + 0.20*1
        assert_eq!(level, RiskLevel::Warning);
    }
}

//! Alert generation: emits a graded alert on risk-level change or on a
//! sustained level held past `AlertResampleInterval`, plus zone-capacity
//! alerts raised directly by the zone evaluator.

use chrono::{DateTime, Utc};

use crate::model::{Alert, RiskLevel, Zone};
use crate::risk::RiskFactors;

/// Tracks the last emitted level/time for one camera's risk stream so
/// `maybe_emit` can apply the change-or-sustained rule. Private to the
/// camera worker.
#[derive(Default)]
pub struct AlertGenerator {
    last_level: Option<RiskLevel>,
    last_alert_at: Option<DateTime<Utc>>,
}

impl AlertGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn maybe_emit(
        &mut self,
        camera_id: &str,
        score: f32,
        level: RiskLevel,
        factors: &RiskFactors,
        now: DateTime<Utc>,
        resample_interval_secs: u64,
    ) -> Option<Alert> {
        // A camera's very first observation establishes a baseline rather
        // than a "change" — unless that baseline is already non-NORMAL, in
        // which case it is worth alerting on immediately.
        let level_changed = match self.last_level {
            None => level != RiskLevel::Normal,
            Some(prev) => prev != level,
        };
        let sustained = self
            .last_alert_at
            .map(|prev| (now - prev).num_seconds() >= resample_interval_secs as i64)
            .unwrap_or(false);

        if level == RiskLevel::Normal && !level_changed {
            // No alert churn while calm and unchanged.
            self.last_level = Some(level);
            return None;
        }

        if !level_changed && !sustained {
            self.last_level = Some(level);
            return None;
        }

        self.last_level = Some(level);
        self.last_alert_at = Some(now);

        Some(Alert {
            id: 0,
            camera_id: camera_id.to_string(),
            kind: risk_alert_kind(level, factors).to_string(),
            severity: level,
            risk_score: score,
            message: risk_alert_message(level, score),
            timestamp: now,
            acknowledged: false,
        })
    }
}

fn risk_alert_kind(level: RiskLevel, factors: &RiskFactors) -> &'static str {
    match level {
        RiskLevel::Critical => "stampede_risk",
        RiskLevel::Warning if factors.density >= factors.congestion => "high_density",
        RiskLevel::Warning => "congestion",
        RiskLevel::Normal => "congestion",
    }
}

fn risk_alert_message(level: RiskLevel, score: f32) -> String {
    match level {
        RiskLevel::Normal => format!("risk normalized (score {:.2})", score),
        RiskLevel::Warning => format!("elevated crowd risk (score {:.2})", score),
        RiskLevel::Critical => format!("critical crowd risk (score {:.2})", score),
    }
}

/// Called by the zone evaluator when a zone's occupancy crosses above its
/// configured `max_capacity`.
pub fn zone_overcapacity_alert(zone: &Zone, now: DateTime<Utc>) -> Alert {
    Alert {
        id: 0,
        camera_id: zone.camera_id.clone(),
        kind: "zone_overcapacity".to_string(),
        severity: RiskLevel::Warning,
        risk_score: 0.0,
        message: format!(
            "zone {} over capacity ({}/{})",
            zone.name,
            zone.current_occupancy,
            zone.max_capacity.unwrap_or(0)
        ),
        timestamp: now,
        acknowledged: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::RiskFactors;

    fn factors() -> RiskFactors {
        RiskFactors {
            density: 0.5,
            speed_variance: 0.0,
            congestion: 0.5,
            directional_conflict: 0.0,
            sudden_movement: 0.0,
        }
    }

    #[test]
    fn emits_on_level_change() {
        let mut gen = AlertGenerator::new();
        let now = Utc::now();
        assert!(gen.maybe_emit("cam0", 0.5, RiskLevel::Warning, &factors(), now, 30).is_some());
        // Same level, no time elapsed: no churn.
        assert!(gen.maybe_emit("cam0", 0.5, RiskLevel::Warning, &factors(), now, 30).is_none());
    }

    #[test]
    fn emits_again_after_sustained_interval() {
        let mut gen = AlertGenerator::new();
        let now = Utc::now();
        gen.maybe_emit("cam0", 0.5, RiskLevel::Warning, &factors(), now, 30);
        let later = now + chrono::Duration::seconds(31);
        assert!(gen.maybe_emit("cam0", 0.5, RiskLevel::Warning, &factors(), later, 30).is_some());
    }

    #[test]
    fn no_churn_while_calm_and_unchanged() {
        let mut gen = AlertGenerator::new();
        let now = Utc::now();
        assert!(gen.maybe_emit("cam0", 0.1, RiskLevel::Normal, &factors(), now, 30).is_none());
        let later = now + chrono::Duration::seconds(60);
        assert!(gen.maybe_emit("cam0", 0.1, RiskLevel::Normal, &factors(), later, 30).is_none());
    }

    #[test]
    fn monotonic_density_rise_transitions_through_all_three_levels() {
        let mut gen = AlertGenerator::new();
        let now = Utc::now();
        let levels = [RiskLevel::Normal, RiskLevel::Warning, RiskLevel::Critical];
        for (i, level) in levels.iter().enumerate() {
            let t = now + chrono::Duration::seconds(i as i64);
            let alert = gen.maybe_emit("cam0", 0.5, *level, &factors(), t, 30);
            if i == 0 {
                assert!(alert.is_none(), "first NORMAL observation is not itself an alert");
            } else {
                assert!(alert.is_some());
            }
        }
    }
}

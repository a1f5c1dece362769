//! Zone membership, entry/exit event generation, occupancy bookkeeping.
//!
//! Generalizes the teacher's fixed 3x3-grid `classify_zone` (see
//! `movement.rs`) to arbitrary user-defined polygons, and its single-track
//! description strings to per-(track,zone) edge-transition events.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::{BBox, EntryExitEvent, EventKind, Zone, ZoneType};

/// Point-in-polygon via the standard ray-casting test. `polygon` is a closed
/// simple ring of `(x, y)` integer pixel vertices.
pub fn point_in_polygon(point: (f32, f32), polygon: &[(i32, i32)]) -> bool {
    let (px, py) = point;
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (polygon[i].0 as f32, polygon[i].1 as f32);
        let (xj, yj) = (polygon[j].0 as f32, polygon[j].1 as f32);
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Tracks the inside/outside bit for every (track_id, zone_id) pair observed
/// on one camera, so the edge-transition rule in §4.5 can be evaluated frame
/// over frame. Private to the camera worker that owns it.
#[derive(Default)]
pub struct ZoneEvaluator {
    /// `(track_id, zone_id) -> was inside last frame`
    membership: HashMap<(u64, String), bool>,
}

impl ZoneEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate one confirmed track's bottom-center against every zone,
    /// emitting entry/exit events and mutating zone occupancy in place.
    pub fn evaluate(
        &mut self,
        camera_id: &str,
        track_id: u64,
        bbox: &BBox,
        zones: &mut [Zone],
        timestamp: DateTime<Utc>,
    ) -> Vec<EntryExitEvent> {
        let point = bbox.bottom_center();
        let mut events = Vec::new();

        for zone in zones.iter_mut() {
            let cur = point_in_polygon(point, &zone.polygon);
            let key = (track_id, zone.id.clone());
            let prev = self.membership.get(&key).copied();

            let transition = match prev {
                None if cur => Some(EventKind::Entry),
                Some(false) if cur => Some(EventKind::Entry),
                Some(true) if !cur => Some(EventKind::Exit),
                _ => None,
            };

            if let Some(kind) = transition {
                match kind {
                    EventKind::Entry => {
                        if zone.zone_type == ZoneType::Entry {
                            zone.current_occupancy = zone.current_occupancy.saturating_add(1);
                        }
                    }
                    EventKind::Exit => {
                        if zone.zone_type == ZoneType::Exit {
                            zone.current_occupancy = zone.current_occupancy.saturating_sub(1);
                        }
                    }
                }
                events.push(EntryExitEvent {
                    camera_id: camera_id.to_string(),
                    zone_id: zone.id.clone(),
                    track_id,
                    kind,
                    timestamp,
                });
            }

            self.membership.insert(key, cur);
        }

        events
    }

    /// Drop bookkeeping for a track that has terminated, so future track ids
    /// never inherit its membership history.
    pub fn forget_track(&mut self, track_id: u64) {
        self.membership.retain(|(t, _), _| *t != track_id);
    }
}

/// True when a zone's occupancy has exceeded its configured capacity —
/// callers raise a `zone_overcapacity` alert on the transition into this
/// state, per §4.5 ("the stage does not reject detections; it raises a
/// zone-level alert when capacity is exceeded").
pub fn is_over_capacity(zone: &Zone) -> bool {
    matches!(zone.max_capacity, Some(cap) if zone.current_occupancy > cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_zone(id: &str, zone_type: ZoneType) -> Zone {
        Zone {
            id: id.to_string(),
            camera_id: "cam0".to_string(),
            name: "z".to_string(),
            zone_type,
            polygon: vec![(0, 0), (320, 0), (320, 480), (0, 480)],
            max_capacity: None,
            current_occupancy: 0,
            status: "active".to_string(),
        }
    }

    #[test]
    fn point_inside_square_is_detected() {
        let poly = vec![(0, 0), (100, 0), (100, 100), (0, 100)];
        assert!(point_in_polygon((50.0, 50.0), &poly));
        assert!(!point_in_polygon((150.0, 50.0), &poly));
    }

    #[test]
    fn first_observation_inside_counts_as_entry() {
        let mut eval = ZoneEvaluator::new();
        let mut zones = vec![square_zone("z1", ZoneType::Entry)];
        let bbox = BBox { x: 100.0, y: 400.0, w: 20.0, h: 40.0 };
        let events = eval.evaluate("cam0", 1, &bbox, &mut zones, Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Entry);
        assert_eq!(zones[0].current_occupancy, 1);
    }

    #[test]
    fn events_alternate_entry_exit_for_same_track_and_zone() {
        let mut eval = ZoneEvaluator::new();
        let mut zones = vec![square_zone("z1", ZoneType::Entry)];
        let inside = BBox { x: 100.0, y: 400.0, w: 20.0, h: 40.0 };
        let outside = BBox { x: 1000.0, y: 400.0, w: 20.0, h: 40.0 };
        let now = Utc::now();

        let e1 = eval.evaluate("cam0", 1, &inside, &mut zones, now);
        let e2 = eval.evaluate("cam0", 1, &inside, &mut zones, now); // no transition
        let e3 = eval.evaluate("cam0", 1, &outside, &mut zones, now);
        let e4 = eval.evaluate("cam0", 1, &inside, &mut zones, now);

        assert_eq!(e1[0].kind, EventKind::Entry);
        assert!(e2.is_empty());
        assert_eq!(e3[0].kind, EventKind::Exit);
        assert_eq!(e4[0].kind, EventKind::Entry);
    }

    #[test]
    fn over_capacity_detection() {
        let mut zone = square_zone("z1", ZoneType::Monitor);
        zone.max_capacity = Some(2);
        zone.current_occupancy = 3;
        assert!(is_over_capacity(&zone));
        zone.current_occupancy = 2;
        assert!(!is_over_capacity(&zone));
    }
}

//! Core data model — entities and invariants shared by every stage and by
//! the REST surface. Mirrors the entities enumerated in the specification's
//! data model section one-to-one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub id: String,
    pub edge_id: String,
    pub location: String,
    pub resolution: (u32, u32),
    pub fps: f64,
    pub status: CameraStatus,
    pub last_frame_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn bottom_center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn is_within(&self, width: f32, height: f32) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.x + self.w <= width && self.y + self.h <= height
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub camera_id: String,
    pub frame_id: u64,
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class: &'static str,
    pub track_ref: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tentative,
    Confirmed,
    Lost,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: u64,
    pub camera_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub total_frames: u32,
    pub avg_confidence: f32,
    pub state: TrackState,
    pub bbox: BBox,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Entry,
    Exit,
    Monitor,
    Restricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub camera_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub polygon: Vec<(i32, i32)>,
    pub max_capacity: Option<u32>,
    pub current_occupancy: u32,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryExitEvent {
    pub camera_id: String,
    pub zone_id: String,
    pub track_id: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CongestionLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(rename = "NORMAL")]
    Normal,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f32) -> Self {
        if score < 0.4 {
            RiskLevel::Normal
        } else if score < 0.7 {
            RiskLevel::Warning
        } else {
            RiskLevel::Critical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSample {
    pub camera_id: String,
    pub timestamp: DateTime<Utc>,
    pub people_count: u32,
    pub density: f32,
    pub avg_speed: f32,
    pub flow: (f32, f32),
    pub congestion: CongestionLevel,
    pub risk_score: f32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub camera_id: String,
    pub kind: String,
    pub severity: RiskLevel,
    pub risk_score: f32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    Low,
    Medium,
    High,
}

impl MatchConfidence {
    pub fn from_similarity(sim: f32) -> Self {
        if sim >= 0.85 {
            MatchConfidence::High
        } else if sim >= 0.75 {
            MatchConfidence::Medium
        } else {
            MatchConfidence::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCameraMovement {
    pub entry_camera: String,
    pub entry_zone: Option<String>,
    pub entry_track: u64,
    pub entry_ts: DateTime<Utc>,
    pub exit_camera: String,
    pub exit_zone: Option<String>,
    pub exit_track: u64,
    pub exit_ts: DateTime<Utc>,
    pub similarity: f32,
    pub confidence: MatchConfidence,
    pub duration_s: f64,
}

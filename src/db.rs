//! Persistence: SQLite via `rusqlite`, matching the teacher's
//! `Arc<Mutex<Connection>>` single-writer pattern (`database.rs`) with the
//! spec's explicit write-buffer bound added on top (`WriteBufMax`).

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::model::{
    Alert, AnalyticsSample, Camera, CameraStatus, CongestionLevel, CrossCameraMovement,
    EntryExitEvent, EventKind, MatchConfidence, RiskLevel, Zone, ZoneType,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cameras (
    id              TEXT PRIMARY KEY,
    edge_id         TEXT NOT NULL,
    location        TEXT NOT NULL,
    width           INTEGER NOT NULL,
    height          INTEGER NOT NULL,
    fps             REAL NOT NULL,
    status          TEXT NOT NULL,
    last_frame_time TEXT
);

CREATE TABLE IF NOT EXISTS zones (
    id               TEXT PRIMARY KEY,
    camera_id        TEXT NOT NULL,
    name             TEXT NOT NULL,
    zone_type        TEXT NOT NULL,
    polygon          TEXT NOT NULL,
    max_capacity     INTEGER,
    current_occupancy INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS entry_exit_events (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id TEXT NOT NULL,
    zone_id   TEXT NOT NULL,
    track_id  INTEGER NOT NULL,
    kind      TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analytics_samples (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id    TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    people_count INTEGER NOT NULL,
    density      REAL NOT NULL,
    avg_speed    REAL NOT NULL,
    flow_x       REAL NOT NULL,
    flow_y       REAL NOT NULL,
    congestion   TEXT NOT NULL,
    risk_score   REAL NOT NULL,
    risk_level   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    camera_id    TEXT NOT NULL,
    kind         TEXT NOT NULL,
    severity     TEXT NOT NULL,
    risk_score   REAL NOT NULL,
    message      TEXT NOT NULL,
    timestamp    TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS movements (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_camera  TEXT NOT NULL,
    entry_zone    TEXT,
    entry_track   INTEGER NOT NULL,
    entry_ts      TEXT NOT NULL,
    exit_camera   TEXT NOT NULL,
    exit_zone     TEXT,
    exit_track    INTEGER NOT NULL,
    exit_ts       TEXT NOT NULL,
    similarity    REAL NOT NULL,
    confidence    TEXT NOT NULL,
    duration_s    REAL NOT NULL,
    UNIQUE(entry_track, entry_camera, exit_track, exit_camera)
);

CREATE INDEX IF NOT EXISTS idx_events_cam ON entry_exit_events(camera_id);
CREATE INDEX IF NOT EXISTS idx_samples_cam_ts ON analytics_samples(camera_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_alerts_cam ON alerts(camera_id, acknowledged);
CREATE INDEX IF NOT EXISTS idx_movements_cams ON movements(entry_camera, exit_camera);
"#;

pub struct Database {
    conn: StdMutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: StdMutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: StdMutex::new(conn) })
    }

    // ── Cameras ──────────────────────────────────────────────────────────

    pub fn upsert_camera(&self, camera: &Camera) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cameras (id, edge_id, location, width, height, fps, status, last_frame_time)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(id) DO UPDATE SET
                edge_id=excluded.edge_id, location=excluded.location,
                width=excluded.width, height=excluded.height, fps=excluded.fps",
            params![
                camera.id,
                camera.edge_id,
                camera.location,
                camera.resolution.0,
                camera.resolution.1,
                camera.fps,
                status_str(camera.status),
                camera.last_frame_time.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn touch_camera_frame_time(&self, camera_id: &str, ts: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cameras SET last_frame_time=?1, status='active' WHERE id=?2",
            params![ts.to_rfc3339(), camera_id],
        )?;
        Ok(())
    }

    pub fn get_camera(&self, camera_id: &str) -> Result<Option<Camera>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, edge_id, location, width, height, fps, status, last_frame_time FROM cameras WHERE id=?1",
        )?;
        let result = stmt
            .query_row(params![camera_id], row_to_camera)
            .ok();
        Ok(result)
    }

    pub fn list_cameras(&self) -> Result<Vec<Camera>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, edge_id, location, width, height, fps, status, last_frame_time FROM cameras ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_camera)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    // ── Zones ────────────────────────────────────────────────────────────

    pub fn create_zone(&self, zone: &Zone) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO zones (id, camera_id, name, zone_type, polygon, max_capacity, current_occupancy, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                zone.id,
                zone.camera_id,
                zone.name,
                zone_type_str(zone.zone_type),
                serde_json::to_string(&zone.polygon)?,
                zone.max_capacity,
                zone.current_occupancy,
                zone.status,
            ],
        )?;
        Ok(())
    }

    pub fn update_zone(&self, zone: &Zone) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE zones SET name=?1, zone_type=?2, polygon=?3, max_capacity=?4,
             current_occupancy=?5, status=?6 WHERE id=?7",
            params![
                zone.name,
                zone_type_str(zone.zone_type),
                serde_json::to_string(&zone.polygon)?,
                zone.max_capacity,
                zone.current_occupancy,
                zone.status,
                zone.id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_zone(&self, zone_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM zones WHERE id=?1", params![zone_id])?;
        Ok(changed > 0)
    }

    pub fn get_zone(&self, zone_id: &str) -> Result<Option<Zone>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, camera_id, name, zone_type, polygon, max_capacity, current_occupancy, status FROM zones WHERE id=?1",
        )?;
        Ok(stmt.query_row(params![zone_id], row_to_zone).ok())
    }

    pub fn list_zones_for_camera(&self, camera_id: &str) -> Result<Vec<Zone>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, camera_id, name, zone_type, polygon, max_capacity, current_occupancy, status FROM zones WHERE camera_id=?1",
        )?;
        let rows = stmt.query_map(params![camera_id], row_to_zone)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    // ── Entry/exit events ────────────────────────────────────────────────

    pub fn insert_entry_exit_event(&self, event: &EntryExitEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entry_exit_events (camera_id, zone_id, track_id, kind, timestamp)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                event.camera_id,
                event.zone_id,
                event.track_id as i64,
                event_kind_str(event.kind),
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_entry_exit_events(&self, camera_id: &str, limit: u32) -> Result<Vec<EntryExitEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT camera_id, zone_id, track_id, kind, timestamp FROM entry_exit_events
             WHERE camera_id=?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![camera_id, limit], |r| {
                Ok(EntryExitEvent {
                    camera_id: r.get(0)?,
                    zone_id: r.get(1)?,
                    track_id: r.get::<_, i64>(2)? as u64,
                    kind: parse_event_kind(&r.get::<_, String>(3)?),
                    timestamp: parse_dt(r.get::<_, String>(4)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn entry_exit_counts(&self, camera_id: &str) -> Result<(u64, u64)> {
        let conn = self.conn.lock().unwrap();
        let entries: u64 = conn.query_row(
            "SELECT COUNT(*) FROM entry_exit_events WHERE camera_id=?1 AND kind='entry'",
            params![camera_id],
            |r| r.get(0),
        )?;
        let exits: u64 = conn.query_row(
            "SELECT COUNT(*) FROM entry_exit_events WHERE camera_id=?1 AND kind='exit'",
            params![camera_id],
            |r| r.get(0),
        )?;
        Ok((entries, exits))
    }

    // ── Analytics samples ────────────────────────────────────────────────

    pub fn insert_analytics_sample(&self, sample: &AnalyticsSample) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO analytics_samples
             (camera_id, timestamp, people_count, density, avg_speed, flow_x, flow_y, congestion, risk_score, risk_level)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                sample.camera_id,
                sample.timestamp.to_rfc3339(),
                sample.people_count,
                sample.density,
                sample.avg_speed,
                sample.flow.0,
                sample.flow.1,
                congestion_str(sample.congestion),
                sample.risk_score,
                risk_level_str(sample.risk_level),
            ],
        )?;
        Ok(())
    }

    pub fn history(
        &self,
        camera_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_secs: i64,
    ) -> Result<Vec<AnalyticsSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT camera_id, timestamp, people_count, density, avg_speed, flow_x, flow_y, congestion, risk_score, risk_level
             FROM analytics_samples WHERE camera_id=?1 AND timestamp>=?2 AND timestamp<=?3 ORDER BY timestamp",
        )?;
        let all: Vec<AnalyticsSample> = stmt
            .query_map(params![camera_id, start.to_rfc3339(), end.to_rfc3339()], row_to_sample)?
            .filter_map(|r| r.ok())
            .collect();

        if interval_secs <= 0 {
            return Ok(all);
        }

        // Bucket by interval, keeping the last sample observed per bucket.
        let mut buckets: std::collections::BTreeMap<i64, AnalyticsSample> = std::collections::BTreeMap::new();
        for sample in all {
            let bucket = sample.timestamp.timestamp() / interval_secs;
            buckets.insert(bucket, sample);
        }
        Ok(buckets.into_values().collect())
    }

    pub fn latest_sample(&self, camera_id: &str) -> Result<Option<AnalyticsSample>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT camera_id, timestamp, people_count, density, avg_speed, flow_x, flow_y, congestion, risk_score, risk_level
             FROM analytics_samples WHERE camera_id=?1 ORDER BY timestamp DESC LIMIT 1",
        )?;
        Ok(stmt.query_row(params![camera_id], row_to_sample).ok())
    }

    // ── Alerts ───────────────────────────────────────────────────────────

    pub fn insert_alert(&self, alert: &Alert) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alerts (camera_id, kind, severity, risk_score, message, timestamp, acknowledged)
             VALUES (?1,?2,?3,?4,?5,?6,0)",
            params![
                alert.camera_id,
                alert.kind,
                risk_level_str(alert.severity),
                alert.risk_score,
                alert.message,
                alert.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn active_alerts(
        &self,
        camera_id: Option<&str>,
        severity: Option<RiskLevel>,
        limit: u32,
    ) -> Result<Vec<Alert>> {
        const BASE: &str = "SELECT id, camera_id, kind, severity, risk_score, message, timestamp, acknowledged
                             FROM alerts WHERE acknowledged=0";
        let conn = self.conn.lock().unwrap();
        let rows: Vec<Alert> = match (camera_id, severity) {
            (Some(cam), Some(sev)) => {
                let sql = format!("{BASE} AND camera_id=?1 AND severity=?2 ORDER BY timestamp DESC LIMIT ?3");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![cam, risk_level_str(sev), limit], row_to_alert)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            (Some(cam), None) => {
                let sql = format!("{BASE} AND camera_id=?1 ORDER BY timestamp DESC LIMIT ?2");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![cam, limit], row_to_alert)?.filter_map(|r| r.ok()).collect()
            }
            (None, Some(sev)) => {
                let sql = format!("{BASE} AND severity=?1 ORDER BY timestamp DESC LIMIT ?2");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![risk_level_str(sev), limit], row_to_alert)?
                    .filter_map(|r| r.ok())
                    .collect()
            }
            (None, None) => {
                let sql = format!("{BASE} ORDER BY timestamp DESC LIMIT ?1");
                let mut stmt = conn.prepare(&sql)?;
                stmt.query_map(params![limit], row_to_alert)?.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    pub fn acknowledge_alert(&self, id: i64) -> Result<Option<Alert>> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE alerts SET acknowledged=1 WHERE id=?1", params![id])?;
        let mut stmt = conn.prepare(
            "SELECT id, camera_id, kind, severity, risk_score, message, timestamp, acknowledged FROM alerts WHERE id=?1",
        )?;
        Ok(stmt.query_row(params![id], row_to_alert).ok())
    }

    // ── Cross-camera movements ───────────────────────────────────────────

    /// Idempotent on `(entry_track, entry_camera, exit_track, exit_camera)`:
    /// replaces the stored similarity only if the new one is strictly
    /// higher.
    pub fn upsert_movement(&self, m: &CrossCameraMovement) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO movements
             (entry_camera, entry_zone, entry_track, entry_ts, exit_camera, exit_zone, exit_track, exit_ts, similarity, confidence, duration_s)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
             ON CONFLICT(entry_track, entry_camera, exit_track, exit_camera) DO UPDATE SET
                similarity=excluded.similarity, confidence=excluded.confidence, duration_s=excluded.duration_s
             WHERE excluded.similarity > movements.similarity",
            params![
                m.entry_camera,
                m.entry_zone,
                m.entry_track as i64,
                m.entry_ts.to_rfc3339(),
                m.exit_camera,
                m.exit_zone,
                m.exit_track as i64,
                m.exit_ts.to_rfc3339(),
                m.similarity,
                match_confidence_str(m.confidence),
                m.duration_s,
            ],
        )?;
        Ok(())
    }

    pub fn movements_for_camera(&self, camera_id: &str, limit: u32) -> Result<Vec<CrossCameraMovement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry_camera, entry_zone, entry_track, entry_ts, exit_camera, exit_zone, exit_track, exit_ts, similarity, confidence, duration_s
             FROM movements WHERE entry_camera=?1 OR exit_camera=?1 ORDER BY entry_ts DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![camera_id, limit], row_to_movement)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn movements_for_pair(&self, a: &str, b: &str, limit: u32) -> Result<Vec<CrossCameraMovement>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT entry_camera, entry_zone, entry_track, entry_ts, exit_camera, exit_zone, exit_track, exit_ts, similarity, confidence, duration_s
             FROM movements WHERE (entry_camera=?1 AND exit_camera=?2) OR (entry_camera=?2 AND exit_camera=?1)
             ORDER BY entry_ts DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![a, b, limit], row_to_movement)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// General filtered search behind `GET /movements`: every filter is
    /// optional and AND-ed together, built dynamically like `active_alerts`.
    #[allow(clippy::too_many_arguments)]
    pub fn search_movements(
        &self,
        entry_camera_id: Option<&str>,
        exit_camera_id: Option<&str>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<CrossCameraMovement>> {
        let conn = self.conn.lock().unwrap();
        let mut clauses = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(cam) = entry_camera_id {
            clauses.push(format!("entry_camera=?{}", values.len() + 1));
            values.push(Box::new(cam.to_string()));
        }
        if let Some(cam) = exit_camera_id {
            clauses.push(format!("exit_camera=?{}", values.len() + 1));
            values.push(Box::new(cam.to_string()));
        }
        if let Some(start) = start {
            clauses.push(format!("entry_ts>=?{}", values.len() + 1));
            values.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = end {
            clauses.push(format!("exit_ts<=?{}", values.len() + 1));
            values.push(Box::new(end.to_rfc3339()));
        }

        let where_clause = if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let limit_idx = values.len() + 1;
        let sql = format!(
            "SELECT entry_camera, entry_zone, entry_track, entry_ts, exit_camera, exit_zone, exit_track, exit_ts, similarity, confidence, duration_s
             FROM movements {where_clause} ORDER BY entry_ts DESC LIMIT ?{limit_idx}"
        );
        values.push(Box::new(limit));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), row_to_movement)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    pub fn movement_statistics(&self) -> Result<(u64, f64)> {
        let conn = self.conn.lock().unwrap();
        let total: u64 = conn.query_row("SELECT COUNT(*) FROM movements", [], |r| r.get(0))?;
        let avg_similarity: f64 =
            conn.query_row("SELECT COALESCE(AVG(similarity), 0.0) FROM movements", [], |r| r.get(0))?;
        Ok((total, avg_similarity))
    }
}

/// Bounded per-producer write buffer: batches rows awaiting a store attempt
/// and drops the oldest once `capacity` is exceeded, matching §5's
/// `WriteBufMax = 1000` / drop-oldest-on-persistent-failure rule.
pub struct WriteBuffer<T> {
    queue: StdMutex<VecDeque<T>>,
    capacity: usize,
}

impl<T> WriteBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self { queue: StdMutex::new(VecDeque::with_capacity(capacity.min(64))), capacity }
    }

    pub fn push(&self, item: T) {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= self.capacity {
            q.pop_front();
        }
        q.push_back(item);
    }

    pub fn drain(&self) -> Vec<T> {
        let mut q = self.queue.lock().unwrap();
        q.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── row mappers & enum (de)serialization ────────────────────────────────

fn status_str(s: CameraStatus) -> &'static str {
    match s {
        CameraStatus::Active => "active",
        CameraStatus::Inactive => "inactive",
    }
}

fn zone_type_str(t: ZoneType) -> &'static str {
    match t {
        ZoneType::Entry => "entry",
        ZoneType::Exit => "exit",
        ZoneType::Monitor => "monitor",
        ZoneType::Restricted => "restricted",
    }
}

fn parse_zone_type(s: &str) -> ZoneType {
    match s {
        "entry" => ZoneType::Entry,
        "exit" => ZoneType::Exit,
        "restricted" => ZoneType::Restricted,
        _ => ZoneType::Monitor,
    }
}

fn event_kind_str(k: EventKind) -> &'static str {
    match k {
        EventKind::Entry => "entry",
        EventKind::Exit => "exit",
    }
}

fn parse_event_kind(s: &str) -> EventKind {
    if s == "entry" {
        EventKind::Entry
    } else {
        EventKind::Exit
    }
}

fn congestion_str(c: CongestionLevel) -> &'static str {
    match c {
        CongestionLevel::Low => "low",
        CongestionLevel::Medium => "medium",
        CongestionLevel::High => "high",
    }
}

fn parse_congestion(s: &str) -> CongestionLevel {
    match s {
        "medium" => CongestionLevel::Medium,
        "high" => CongestionLevel::High,
        _ => CongestionLevel::Low,
    }
}

fn risk_level_str(l: RiskLevel) -> &'static str {
    match l {
        RiskLevel::Normal => "NORMAL",
        RiskLevel::Warning => "WARNING",
        RiskLevel::Critical => "CRITICAL",
    }
}

fn parse_risk_level(s: &str) -> RiskLevel {
    match s {
        "WARNING" => RiskLevel::Warning,
        "CRITICAL" => RiskLevel::Critical,
        _ => RiskLevel::Normal,
    }
}

fn match_confidence_str(c: MatchConfidence) -> &'static str {
    match c {
        MatchConfidence::Low => "low",
        MatchConfidence::Medium => "medium",
        MatchConfidence::High => "high",
    }
}

fn parse_match_confidence(s: &str) -> MatchConfidence {
    match s {
        "high" => MatchConfidence::High,
        "medium" => MatchConfidence::Medium,
        _ => MatchConfidence::Low,
    }
}

fn parse_dt(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

fn row_to_camera(r: &rusqlite::Row) -> rusqlite::Result<Camera> {
    Ok(Camera {
        id: r.get(0)?,
        edge_id: r.get(1)?,
        location: r.get(2)?,
        resolution: (r.get::<_, i64>(3)? as u32, r.get::<_, i64>(4)? as u32),
        fps: r.get(5)?,
        status: if r.get::<_, String>(6)? == "active" { CameraStatus::Active } else { CameraStatus::Inactive },
        last_frame_time: r.get::<_, Option<String>>(7)?.map(parse_dt),
    })
}

fn row_to_zone(r: &rusqlite::Row) -> rusqlite::Result<Zone> {
    let polygon_json: String = r.get(4)?;
    Ok(Zone {
        id: r.get(0)?,
        camera_id: r.get(1)?,
        name: r.get(2)?,
        zone_type: parse_zone_type(&r.get::<_, String>(3)?),
        polygon: serde_json::from_str(&polygon_json).unwrap_or_default(),
        max_capacity: r.get(5)?,
        current_occupancy: r.get::<_, i64>(6)? as u32,
        status: r.get(7)?,
    })
}

fn row_to_sample(r: &rusqlite::Row) -> rusqlite::Result<AnalyticsSample> {
    Ok(AnalyticsSample {
        camera_id: r.get(0)?,
        timestamp: parse_dt(r.get(1)?),
        people_count: r.get::<_, i64>(2)? as u32,
        density: r.get(3)?,
        avg_speed: r.get(4)?,
        flow: (r.get(5)?, r.get(6)?),
        congestion: parse_congestion(&r.get::<_, String>(7)?),
        risk_score: r.get(8)?,
        risk_level: parse_risk_level(&r.get::<_, String>(9)?),
    })
}

fn row_to_alert(r: &rusqlite::Row) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: r.get(0)?,
        camera_id: r.get(1)?,
        kind: r.get(2)?,
        severity: parse_risk_level(&r.get::<_, String>(3)?),
        risk_score: r.get(4)?,
        message: r.get(5)?,
        timestamp: parse_dt(r.get(6)?),
        acknowledged: r.get::<_, i64>(7)? != 0,
    })
}

fn row_to_movement(r: &rusqlite::Row) -> rusqlite::Result<CrossCameraMovement> {
    Ok(CrossCameraMovement {
        entry_camera: r.get(0)?,
        entry_zone: r.get(1)?,
        entry_track: r.get::<_, i64>(2)? as u64,
        entry_ts: parse_dt(r.get(3)?),
        exit_camera: r.get(4)?,
        exit_zone: r.get(5)?,
        exit_track: r.get::<_, i64>(6)? as u64,
        exit_ts: parse_dt(r.get(7)?),
        similarity: r.get(8)?,
        confidence: parse_match_confidence(&r.get::<_, String>(9)?),
        duration_s: r.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_camera() -> Camera {
        Camera {
            id: "cam0".to_string(),
            edge_id: "edge0".to_string(),
            location: "lobby".to_string(),
            resolution: (640, 480),
            fps: 30.0,
            status: CameraStatus::Active,
            last_frame_time: None,
        }
    }

    #[test]
    fn register_then_list_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_camera(&sample_camera()).unwrap();
        let cams = db.list_cameras().unwrap();
        assert_eq!(cams.len(), 1);
        assert_eq!(cams[0].id, "cam0");
    }

    #[test]
    fn zone_lifecycle_create_read_update_delete() {
        let db = Database::open_in_memory().unwrap();
        let zone = Zone {
            id: "z1".to_string(),
            camera_id: "cam0".to_string(),
            name: "entrance".to_string(),
            zone_type: ZoneType::Entry,
            polygon: vec![(0, 0), (10, 0), (10, 10)],
            max_capacity: Some(5),
            current_occupancy: 0,
            status: "active".to_string(),
        };
        db.create_zone(&zone).unwrap();
        assert!(db.get_zone("z1").unwrap().is_some());

        let mut updated = zone.clone();
        updated.current_occupancy = 3;
        db.update_zone(&updated).unwrap();
        assert_eq!(db.get_zone("z1").unwrap().unwrap().current_occupancy, 3);

        assert!(db.delete_zone("z1").unwrap());
        assert!(db.get_zone("z1").unwrap().is_none());
    }

    #[test]
    fn acknowledge_alert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let alert = Alert {
            id: 0,
            camera_id: "cam0".to_string(),
            kind: "high_density".to_string(),
            severity: RiskLevel::Warning,
            risk_score: 0.5,
            message: "m".to_string(),
            timestamp: Utc::now(),
            acknowledged: false,
        };
        let id = db.insert_alert(&alert).unwrap();
        let first = db.acknowledge_alert(id).unwrap().unwrap();
        let second = db.acknowledge_alert(id).unwrap().unwrap();
        assert!(first.acknowledged);
        assert!(second.acknowledged);
    }

    #[test]
    fn movement_upsert_replaces_only_on_strictly_higher_similarity() {
        let db = Database::open_in_memory().unwrap();
        let base = CrossCameraMovement {
            entry_camera: "A".to_string(),
            entry_zone: None,
            entry_track: 1,
            entry_ts: Utc::now(),
            exit_camera: "B".to_string(),
            exit_zone: None,
            exit_track: 2,
            exit_ts: Utc::now(),
            similarity: 0.75,
            confidence: MatchConfidence::Medium,
            duration_s: 120.0,
        };
        db.upsert_movement(&base).unwrap();
        let mut lower = base.clone();
        lower.similarity = 0.70;
        db.upsert_movement(&lower).unwrap();
        let rows = db.movements_for_pair("A", "B", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].similarity - 0.75).abs() < 1e-6, "lower similarity must not replace a higher one");

        let mut higher = base.clone();
        higher.similarity = 0.90;
        db.upsert_movement(&higher).unwrap();
        let rows = db.movements_for_pair("A", "B", 10).unwrap();
        assert!((rows[0].similarity - 0.90).abs() < 1e-6);
    }

    #[test]
    fn write_buffer_drops_oldest_past_capacity() {
        let buf: WriteBuffer<u32> = WriteBuffer::new(2);
        buf.push(1);
        buf.push(2);
        buf.push(3);
        assert_eq!(buf.drain(), vec![2, 3]);
    }
}

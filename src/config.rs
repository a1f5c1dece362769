//! Server configuration.
//!
//! Loaded from `crowdmon.toml` (working directory) with env-var overrides,
//! following the teacher's layering (`CROWDMON__SECTION__KEY`, double
//! underscore separators).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub reid: ReidConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub frame_cache: FrameCacheConfig,
    #[serde(default)]
    pub cross_camera: CrossCameraConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}
fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_qmax")]
    pub queue_max: usize,
}
fn default_qmax() -> usize {
    10
}
impl Default for IngestConfig {
    fn default() -> Self {
        Self { queue_max: default_qmax() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub input_size: u32,
}
impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8s.onnx".into(),
            confidence_threshold: 0.5,
            nms_threshold: 0.4,
            input_size: 640,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub iou_match_threshold: f32,
    pub max_age_frames: u32,
    pub min_hits: u32,
}
impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_match_threshold: 0.5,
            max_age_frames: 30,
            min_hits: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReidConfig {
    pub embedding_dim: usize,
    pub ema_alpha: f32,
}
impl Default for ReidConfig {
    fn default() -> Self {
        Self { embedding_dim: 512, ema_alpha: 0.3 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    pub density_norm: f32,
    pub density_bandwidth_px: f32,
}
impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { density_norm: 15.0, density_bandwidth_px: 80.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub reference_speed: f32,
    pub speed_jump_threshold: f32,
    pub alert_resample_interval_secs: u64,
}
impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            reference_speed: 1.5,
            speed_jump_threshold: 0.8,
            alert_resample_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameCacheConfig {
    pub max_frames_per_camera: usize,
    pub ttl_secs: u64,
}
impl Default for FrameCacheConfig {
    fn default() -> Self {
        Self { max_frames_per_camera: 10, ttl_secs: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrossCameraConfig {
    pub sim_threshold: f32,
    pub window_secs: i64,
}
impl Default for CrossCameraConfig {
    fn default() -> Self {
        Self { sim_threshold: 0.70, window_secs: 600 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    pub subscriber_buffer: usize,
    pub send_deadline_ms: u64,
    pub max_consecutive_drops: u32,
}
impl Default for PushConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            send_deadline_ms: 1000,
            max_consecutive_drops: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub write_buf_max: usize,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "crowdmon.db".into(), write_buf_max: 1000 }
    }
}

/// Load configuration from `crowdmon.toml` + environment variable overrides.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name("crowdmon").required(false))
        .add_source(
            config::Environment::with_prefix("CROWDMON")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    // Every section carries Rust-side defaults, but `try_deserialize` still
    // requires presence unless the struct impls Default end to end — merge
    // onto our own defaults instead of the builder's empty map.
    let mut app = default_config();
    if let Ok(partial) = cfg.try_deserialize::<AppConfig>() {
        app = partial;
    }
    Ok(app)
}

pub fn default_config() -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        ingest: IngestConfig::default(),
        detector: DetectorConfig::default(),
        tracker: TrackerConfig::default(),
        reid: ReidConfig::default(),
        analytics: AnalyticsConfig::default(),
        risk: RiskConfig::default(),
        frame_cache: FrameCacheConfig::default(),
        cross_camera: CrossCameraConfig::default(),
        push: PushConfig::default(),
        database: DatabaseConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specification_literals() {
        let cfg = default_config();
        assert_eq!(cfg.ingest.queue_max, 10);
        assert_eq!(cfg.tracker.min_hits, 3);
        assert_eq!(cfg.tracker.max_age_frames, 30);
        assert_eq!(cfg.reid.embedding_dim, 512);
        assert!((cfg.reid.ema_alpha - 0.3).abs() < 1e-6);
        assert!((cfg.cross_camera.sim_threshold - 0.70).abs() < 1e-6);
        assert_eq!(cfg.cross_camera.window_secs, 600);
        assert_eq!(cfg.database.write_buf_max, 1000);
        assert_eq!(cfg.risk.alert_resample_interval_secs, 30);
        assert_eq!(cfg.frame_cache.max_frames_per_camera, 10);
        assert_eq!(cfg.frame_cache.ttl_secs, 5);
    }
}

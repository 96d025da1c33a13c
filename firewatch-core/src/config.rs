use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FirewatchConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// RTSP capture settings. All durations are in milliseconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub url: String,
    pub ffmpeg_path: String,
    pub target_fps: u32,
    pub read_timeout_ms: u64,
    /// Reconnect once this many consecutive reads have failed (strictly more than).
    pub max_consecutive_failures: u32,
    pub retry_delay_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub error_backoff_ms: u64,
    pub idle_poll_ms: u64,
    pub frame_interval_ms: u64,
    pub buffer_capacity: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://127.0.0.1:8554/profile0".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            target_fps: 15,
            read_timeout_ms: 5000,
            max_consecutive_failures: 10,
            retry_delay_ms: 100,
            reconnect_delay_ms: 2000,
            max_reconnect_delay_ms: 2000,
            error_backoff_ms: 2000,
            idle_poll_ms: 100,
            frame_interval_ms: 30,
            buffer_capacity: 2,
        }
    }
}

impl CameraConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DetectorConfig {
    /// `onnx` or `none`
    pub backend: String,
    pub model_path: String,
    pub input_size: u32,
    pub confidence: f32,
    pub iou: f32,
    pub labels: Vec<String>,
    /// TTF/OTF font used for box labels. Boxes are drawn without text when unset.
    pub font_path: Option<PathBuf>,
    pub jpeg_quality: u8,
    /// Directory for annotated alert snapshots. Disabled when unset.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: "onnx".to_string(),
            model_path: "firedetection.onnx".to_string(),
            input_size: 640,
            confidence: 0.4,
            iou: 0.45,
            labels: vec![
                "fire".to_string(),
                "light".to_string(),
                "no-fire".to_string(),
                "smoke".to_string(),
            ],
            font_path: None,
            jpeg_quality: 85,
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://fire_detection.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
    pub heartbeat_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            heartbeat_ms: 1000,
        }
    }
}

impl EventsConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub days: u32,
    pub interval_hours: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            days: 30,
            interval_hours: 24,
        }
    }
}

impl FirewatchConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}

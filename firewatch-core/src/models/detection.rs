use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row of the `detections` table: one alert-time record per detected class.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub detection_type: String,
    pub count: i64,
    pub confidence: Option<f64>,
    pub image_path: Option<String>,
}

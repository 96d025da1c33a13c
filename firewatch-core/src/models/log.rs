use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionLog {
    pub id: i64,
    pub session_id: i64,
    pub timestamp: DateTime<Utc>,
    pub fire_count: i64,
    pub smoke_count: i64,
    pub alert_triggered: bool,
}

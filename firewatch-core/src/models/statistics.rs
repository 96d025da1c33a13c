use serde::{Deserialize, Serialize};

/// Aggregate report over all sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_sessions: i64,
    pub total_fire_detections: i64,
    pub total_smoke_detections: i64,
    /// Sessions started within the last 24 hours.
    pub recent_sessions: i64,
    pub avg_fire_per_session: f64,
    pub avg_smoke_per_session: f64,
}

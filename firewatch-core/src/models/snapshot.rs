use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Fire/smoke counts of the last processed frame.
///
/// Serialized as `{"fire": .., "smoke": .., "timestamp": ..}` on both the
/// status endpoint and the event stream. `timestamp` is UNIX seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub fire: u32,
    pub smoke: u32,
    pub timestamp: f64,
}

impl DetectionSnapshot {
    pub fn new(fire: u32, smoke: u32) -> Self {
        Self {
            fire,
            smoke,
            timestamp: unix_now(),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, 0)
    }

    /// Counts differ; the timestamp is ignored.
    pub fn counts_differ(&self, fire: u32, smoke: u32) -> bool {
        self.fire != fire || self.smoke != smoke
    }

    pub fn is_alert(&self) -> bool {
        self.fire > 0 || self.smoke > 0
    }
}

impl Default for DetectionSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// One enabled-to-disabled capture interval.
///
/// Totals stay at zero while the session is active and are aggregated from
/// its log rows when it is closed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionSession {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_fire: i64,
    pub total_smoke: i64,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!(
            SessionStatus::try_from("active".to_string()).unwrap(),
            SessionStatus::Active
        );
        assert_eq!(SessionStatus::Completed.as_str(), "completed");
        assert!(SessionStatus::try_from("paused".to_string()).is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_value(SessionStatus::Completed).unwrap();
        assert_eq!(json, "completed");
    }
}

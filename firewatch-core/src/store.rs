//! Session store: durable log of detection sessions
//!
//! Plain CRUD over the three tables created by `db::init_schema`:
//! - `detection_sessions`: one row per start/stop interval
//! - `detection_logs`: one row per snapshot change inside an active session
//! - `detections`: per-class alert records
//!
//! Each operation is a single statement except `get_statistics`, which reads
//! several aggregates without a transaction.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::SqlitePool;

use crate::error::FirewatchError;
use crate::models::{DetectionLog, DetectionRecord, DetectionSession, Statistics};

pub const DEFAULT_SESSION_LIMIT: i64 = 50;
pub const DEFAULT_DETECTION_LIMIT: i64 = 100;
pub const DATE_RANGE_FALLBACK_LIMIT: i64 = 100;

const SESSION_COLUMNS: &str = r#"
    id, start_time, end_time,
    total_fire_detections AS total_fire,
    total_smoke_detections AS total_smoke,
    status
"#;

// ============================================================================
// Sessions
// ============================================================================

/// Open a new session in `active` state and return its id.
pub async fn start_session(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO detection_sessions (start_time, status) VALUES (?1, 'active')",
    )
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    tracing::info!(session_id = id, "Detection session started");
    Ok(id)
}

/// Close an active session: stamp the end time and aggregate its log rows.
///
/// Returns `false` when the session does not exist or was already closed,
/// so a repeated stop never overwrites finalized totals.
pub async fn end_session(pool: &SqlitePool, session_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE detection_sessions
        SET end_time = ?1,
            total_fire_detections =
                (SELECT COALESCE(SUM(fire_count), 0) FROM detection_logs WHERE session_id = ?2),
            total_smoke_detections =
                (SELECT COALESCE(SUM(smoke_count), 0) FROM detection_logs WHERE session_id = ?2),
            status = 'completed'
        WHERE id = ?2 AND status = 'active'
        "#,
    )
    .bind(Utc::now())
    .bind(session_id)
    .execute(pool)
    .await?;

    let closed = result.rows_affected() == 1;
    if closed {
        tracing::info!(session_id, "Detection session completed");
    } else {
        tracing::warn!(session_id, "end_session: no active session with this id");
    }
    Ok(closed)
}

pub async fn get_session(
    pool: &SqlitePool,
    session_id: i64,
) -> Result<Option<DetectionSession>, sqlx::Error> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM detection_sessions WHERE id = ?1");
    sqlx::query_as::<_, DetectionSession>(&sql)
        .bind(session_id)
        .fetch_optional(pool)
        .await
}

/// Most recent sessions first.
pub async fn get_sessions(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<DetectionSession>, sqlx::Error> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM detection_sessions ORDER BY start_time DESC, id DESC LIMIT ?1"
    );
    sqlx::query_as::<_, DetectionSession>(&sql)
        .bind(limit.max(0))
        .fetch_all(pool)
        .await
}

/// Sessions started inside `[start, end)`. Without both bounds, the latest
/// `DATE_RANGE_FALLBACK_LIMIT` sessions are returned instead.
pub async fn get_sessions_by_date(
    pool: &SqlitePool,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<DetectionSession>, sqlx::Error> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM detection_sessions \
                 WHERE start_time >= ?1 AND start_time < ?2 ORDER BY start_time DESC, id DESC"
            );
            sqlx::query_as::<_, DetectionSession>(&sql)
                .bind(start)
                .bind(end)
                .fetch_all(pool)
                .await
        }
        _ => get_sessions(pool, DATE_RANGE_FALLBACK_LIMIT).await,
    }
}

// ============================================================================
// Logs
// ============================================================================

/// Append a log row to an active session.
///
/// The insert is conditional on the session being `active`; returns `false`
/// (and writes nothing) otherwise.
pub async fn add_detection_log(
    pool: &SqlitePool,
    session_id: i64,
    fire_count: u32,
    smoke_count: u32,
    alert_triggered: bool,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO detection_logs (session_id, timestamp, fire_count, smoke_count, alert_triggered)
        SELECT ?1, ?2, ?3, ?4, ?5
        WHERE EXISTS (
            SELECT 1 FROM detection_sessions WHERE id = ?1 AND status = 'active'
        )
        "#,
    )
    .bind(session_id)
    .bind(Utc::now())
    .bind(i64::from(fire_count))
    .bind(i64::from(smoke_count))
    .bind(alert_triggered)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All log rows of a session, oldest first.
pub async fn get_session_logs(
    pool: &SqlitePool,
    session_id: i64,
) -> Result<Vec<DetectionLog>, sqlx::Error> {
    sqlx::query_as::<_, DetectionLog>(
        r#"
        SELECT id, session_id, timestamp, fire_count, smoke_count, alert_triggered
        FROM detection_logs
        WHERE session_id = ?1
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Detection records
// ============================================================================

pub async fn add_detection(
    pool: &SqlitePool,
    detection_type: &str,
    count: u32,
    confidence: Option<f32>,
    image_path: Option<&str>,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO detections (timestamp, detection_type, count, confidence, image_path)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(Utc::now())
    .bind(detection_type)
    .bind(i64::from(count))
    .bind(confidence.map(f64::from))
    .bind(image_path)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_all_detections(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<DetectionRecord>, sqlx::Error> {
    sqlx::query_as::<_, DetectionRecord>(
        r#"
        SELECT id, timestamp, detection_type, count, confidence, image_path
        FROM detections
        ORDER BY timestamp DESC, id DESC
        LIMIT ?1
        "#,
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await
}

// ============================================================================
// Reporting
// ============================================================================

pub async fn get_statistics(pool: &SqlitePool) -> Result<Statistics, sqlx::Error> {
    let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detection_sessions")
        .fetch_one(pool)
        .await?;

    let (total_fire, total_smoke): (Option<i64>, Option<i64>) = sqlx::query_as(
        r#"
        SELECT SUM(total_fire_detections), SUM(total_smoke_detections)
        FROM detection_sessions
        "#,
    )
    .fetch_one(pool)
    .await?;

    let recent_sessions: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM detection_sessions WHERE start_time >= ?1")
            .bind(Utc::now() - Duration::days(1))
            .fetch_one(pool)
            .await?;

    let (avg_fire, avg_smoke): (Option<f64>, Option<f64>) = sqlx::query_as(
        r#"
        SELECT AVG(total_fire_detections), AVG(total_smoke_detections)
        FROM detection_sessions
        WHERE status = 'completed'
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(Statistics {
        total_sessions,
        total_fire_detections: total_fire.unwrap_or(0),
        total_smoke_detections: total_smoke.unwrap_or(0),
        recent_sessions,
        avg_fire_per_session: round2(avg_fire.unwrap_or(0.0)),
        avg_smoke_per_session: round2(avg_smoke.unwrap_or(0.0)),
    })
}

/// Delete completed sessions (with their logs) and detection records older
/// than `days`. Active sessions are never removed. Returns the number of
/// rows deleted across all three tables.
pub async fn delete_old_records(pool: &SqlitePool, days: u32) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - Duration::days(i64::from(days));

    let logs = sqlx::query(
        r#"
        DELETE FROM detection_logs
        WHERE session_id IN (
            SELECT id FROM detection_sessions
            WHERE start_time < ?1 AND status = 'completed'
        )
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let sessions = sqlx::query(
        "DELETE FROM detection_sessions WHERE start_time < ?1 AND status = 'completed'",
    )
    .bind(cutoff)
    .execute(pool)
    .await?
    .rows_affected();

    let detections = sqlx::query("DELETE FROM detections WHERE timestamp < ?1")
        .bind(cutoff)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(logs + sessions + detections)
}

// ============================================================================
// Helpers
// ============================================================================

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Parse a date-range bound from a query string.
///
/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. Upper bounds are
/// exclusive: a plain date expands to the start of the day for a lower bound
/// and to the start of the following day for an upper bound, so the whole
/// end day is covered whatever the sub-second precision of stored times.
pub fn parse_date_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>, FirewatchError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| FirewatchError::InvalidInput(format!("invalid date '{raw}'")))?;
    let day = if upper {
        date.succ_opt()
            .ok_or_else(|| FirewatchError::InvalidInput(format!("date out of range '{raw}'")))?
    } else {
        date
    };
    let midnight = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FirewatchError::Other("invalid time of day".to_string()))?;
    Ok(midnight.and_utc())
}

// ============================================================================
// TESTS
// ============================================================================

use crate::config::DatabaseConfig;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS detections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp DATETIME NOT NULL,
        detection_type TEXT NOT NULL,
        count INTEGER NOT NULL,
        confidence REAL,
        image_path TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS detection_sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time DATETIME NOT NULL,
        end_time DATETIME,
        total_fire_detections INTEGER NOT NULL DEFAULT 0,
        total_smoke_detections INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS detection_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id INTEGER NOT NULL,
        timestamp DATETIME NOT NULL,
        fire_count INTEGER NOT NULL DEFAULT 0,
        smoke_count INTEGER NOT NULL DEFAULT 0,
        alert_triggered BOOLEAN NOT NULL DEFAULT 0,
        FOREIGN KEY (session_id) REFERENCES detection_sessions(id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_detection_logs_session ON detection_logs(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_sessions_start ON detection_sessions(start_time)",
];

pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Single-connection in-memory pool. Every connection to `sqlite::memory:`
/// is a separate database, so the pool must never open a second one.
pub async fn memory_pool() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create the three tables if they do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema initialized");
    Ok(())
}

pub async fn health_check(pool: &SqlitePool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT sqlite_version()")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

//! Firewatch HTTP API
//!
//! Axum server for the dashboard. Each JSON endpoint has a thin handler that
//! delegates to an inner function returning `(StatusCode, Value)`, so the
//! logic is testable without going through the router.
//!
//! Endpoints:
//! - GET /, /reports               : embedded dashboard pages
//! - GET /video                    : annotated MJPEG stream
//! - GET /detections               : snapshot changes as Server-Sent Events
//! - GET /detection_status         : current snapshot
//! - GET /start, /stop             : enable/disable capture, open/close a session
//! - GET /api/statistics           : aggregate report
//! - GET /api/sessions?limit=      : latest sessions
//! - GET /api/session/:id          : log rows of one session
//! - GET /api/reports/date-range   : sessions by start date
//! - GET /api/detections?limit=    : alert records
//! - GET /health                   : DB, detector and capture status

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use firewatch_core::{store, DetectionSnapshot, FirewatchConfig};
use futures::Stream;
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::state::MonitorState;
use crate::subsystems::annotate::Annotator;

const FRAME_WAIT: Duration = Duration::from_secs(1);
const MULTIPART_BOUNDARY: &str = "frame";

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub pool: SqlitePool,
    pub config: FirewatchConfig,
    pub monitor: Arc<MonitorState>,
    pub annotator: Arc<Annotator>,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/reports", get(reports_handler))
        .route("/video", get(video_handler))
        .route("/detections", get(detections_stream_handler))
        .route("/detection_status", get(detection_status_handler))
        .route("/start", get(start_handler))
        .route("/stop", get(stop_handler))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/sessions", get(sessions_handler))
        .route("/api/session/:id", get(session_logs_handler))
        .route("/api/reports/date-range", get(date_range_handler))
        .route("/api/detections", get(detection_records_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on `http.host:http.port` until the shutdown signal fires.
///
/// Open video and event streams end on their next poll after shutdown.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let monitor = Arc::clone(&state.monitor);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Firewatch dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            monitor.close();
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Query parameters
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<String>,
}

impl LimitQuery {
    /// Missing or non-numeric limits fall back to `default`.
    pub fn resolve(&self, default: i64) -> i64 {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|n| *n >= 0)
            .unwrap_or(default)
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct DateRangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

fn non_empty(raw: &Option<String>) -> Option<&str> {
    raw.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn error_body(status: StatusCode, message: impl std::fmt::Display) -> (StatusCode, serde_json::Value) {
    (
        status,
        serde_json::json!({
            "status": "error",
            "error": message.to_string(),
        }),
    )
}

fn db_error(e: sqlx::Error) -> (StatusCode, serde_json::Value) {
    tracing::error!(error = %e, "Database error");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, e)
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn start_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.monitor.start(&state.pool).await {
        Ok(outcome) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "session_id": outcome.session_id,
                "already_active": outcome.already_active,
            }),
        ),
        Err(e) => db_error(e),
    }
}

pub async fn stop_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.monitor.stop(&state.pool).await {
        Ok(session_id) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "session_id": session_id,
            }),
        ),
        Err(e) => db_error(e),
    }
}

pub fn detection_status_inner(monitor: &MonitorState) -> serde_json::Value {
    let snapshot = monitor.snapshot();
    serde_json::json!({
        "fire": snapshot.fire,
        "smoke": snapshot.smoke,
        "timestamp": snapshot.timestamp,
    })
}

pub async fn statistics_inner(pool: &SqlitePool) -> (StatusCode, serde_json::Value) {
    match store::get_statistics(pool).await {
        Ok(stats) => (StatusCode::OK, serde_json::json!(stats)),
        Err(e) => db_error(e),
    }
}

pub async fn sessions_inner(pool: &SqlitePool, limit: i64) -> (StatusCode, serde_json::Value) {
    match store::get_sessions(pool, limit).await {
        Ok(sessions) => (StatusCode::OK, serde_json::json!(sessions)),
        Err(e) => db_error(e),
    }
}

/// Log rows of one session; an unknown id yields an empty list.
pub async fn session_logs_inner(pool: &SqlitePool, session_id: i64) -> (StatusCode, serde_json::Value) {
    match store::get_session_logs(pool, session_id).await {
        Ok(logs) => (StatusCode::OK, serde_json::json!(logs)),
        Err(e) => db_error(e),
    }
}

pub async fn date_range_inner(
    pool: &SqlitePool,
    query: &DateRangeQuery,
) -> (StatusCode, serde_json::Value) {
    let start = match non_empty(&query.start_date).map(|raw| store::parse_date_bound(raw, false)) {
        Some(Err(e)) => return error_body(StatusCode::BAD_REQUEST, e),
        Some(Ok(ts)) => Some(ts),
        None => None,
    };
    let end = match non_empty(&query.end_date).map(|raw| store::parse_date_bound(raw, true)) {
        Some(Err(e)) => return error_body(StatusCode::BAD_REQUEST, e),
        Some(Ok(ts)) => Some(ts),
        None => None,
    };

    match store::get_sessions_by_date(pool, start, end).await {
        Ok(sessions) => (StatusCode::OK, serde_json::json!(sessions)),
        Err(e) => db_error(e),
    }
}

pub async fn detection_records_inner(pool: &SqlitePool, limit: i64) -> (StatusCode, serde_json::Value) {
    match store::get_all_detections(pool, limit).await {
        Ok(records) => (StatusCode::OK, serde_json::json!(records)),
        Err(e) => db_error(e),
    }
}

/// Inner health check: DB version plus capture and detector state.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let sqlite_version = match firewatch_core::db::health_check(&state.pool).await {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                }),
            );
        }
    };

    let monitor = &state.monitor;
    (
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "sqlite": sqlite_version,
            "detector": state.annotator.detector_name(),
            "capturing": monitor.is_capturing(),
            "active_session": monitor.active_session(),
            "capture": monitor.stats.snapshot(),
            "frames_dropped": monitor.frames.dropped(),
            "events_dropped": monitor.events.dropped(),
        }),
    )
}

// ============================================================================
// Streams
// ============================================================================

/// One `multipart/x-mixed-replace` part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{MULTIPART_BOUNDARY}\r\nContent-Type: image/jpeg\r\n\r\n");
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// Pull frames off the shared queue, annotate them and emit multipart parts.
/// Waiting for a frame times out every `FRAME_WAIT` so shutdown is noticed.
/// Nothing is dequeued while capture is stopped.
pub fn video_stream(state: Arc<HttpState>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    futures::stream::unfold(state, |state| async move {
        loop {
            if state.monitor.is_closed() {
                return None;
            }
            if !state.monitor.is_capturing() {
                tokio::time::sleep(state.config.camera.idle_poll()).await;
                continue;
            }
            let Some(frame) = state.monitor.frames.pop_timeout(FRAME_WAIT).await else {
                continue;
            };
            match state.annotator.process(frame, &state.monitor, &state.pool).await {
                Ok(Some(jpeg)) => return Some((Ok(multipart_part(&jpeg)), state)),
                Ok(None) => continue,
                Err(e) => tracing::warn!(error = %e, "Frame annotation failed"),
            }
        }
    })
}

fn snapshot_event(snapshot: &DetectionSnapshot) -> Event {
    Event::default()
        .json_data(snapshot)
        .unwrap_or_else(|_| Event::default().comment("heartbeat"))
}

/// Snapshot events, or a `: heartbeat` comment after `heartbeat` of silence.
pub fn event_stream(
    state: Arc<HttpState>,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold(state, move |state| async move {
        if state.monitor.is_closed() {
            return None;
        }
        let event = match state.monitor.events.next(heartbeat).await {
            Some(snapshot) => snapshot_event(&snapshot),
            None => Event::default().comment("heartbeat"),
        };
        Some((Ok(event), state))
    })
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

pub async fn reports_handler() -> Html<&'static str> {
    Html(include_str!("../static/reports.html"))
}

pub async fn video_handler(State(state): State<Arc<HttpState>>) -> Response {
    (
        [
            (
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=frame",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(video_stream(state)),
    )
        .into_response()
}

pub async fn detections_stream_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let heartbeat = state.config.events.heartbeat();
    Sse::new(event_stream(state, heartbeat))
}

pub async fn detection_status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(detection_status_inner(&state.monitor))
}

pub async fn start_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = start_inner(&state).await;
    (status, Json(body))
}

pub async fn stop_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = stop_inner(&state).await;
    (status, Json(body))
}

pub async fn statistics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = statistics_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn sessions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.resolve(store::DEFAULT_SESSION_LIMIT);
    let (status, body) = sessions_inner(&state.pool, limit).await;
    (status, Json(body))
}

pub async fn session_logs_handler(
    State(state): State<Arc<HttpState>>,
    Path(session_id): Path<i64>,
) -> impl IntoResponse {
    let (status, body) = session_logs_inner(&state.pool, session_id).await;
    (status, Json(body))
}

pub async fn date_range_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<DateRangeQuery>,
) -> impl IntoResponse {
    let (status, body) = date_range_inner(&state.pool, &query).await;
    (status, Json(body))
}

pub async fn detection_records_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let limit = query.resolve(store::DEFAULT_DETECTION_LIMIT);
    let (status, body) = detection_records_inner(&state.pool, limit).await;
    (status, Json(body))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

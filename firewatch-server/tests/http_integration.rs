//! HTTP integration tests for the Firewatch dashboard API
//!
//! Each test builds the full router over an in-memory SQLite pool and a
//! detector stub, and dispatches requests with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use firewatch_core::db::memory_pool;
use firewatch_core::{
    BoundingBox, Detection, DetectionSnapshot, Detector, DetectorError, FirewatchConfig, Frame,
    NullDetector, Thresholds,
};
use firewatch_server::http::{build_router, video_stream, HttpState};
use firewatch_server::state::MonitorState;
use firewatch_server::subsystems::annotate::Annotator;
use futures::StreamExt;
use image::RgbImage;
use tower::ServiceExt;

/// Always sees one fire and one light source.
struct FireAndLight;

#[async_trait]
impl Detector for FireAndLight {
    async fn detect(
        &self,
        _image: &RgbImage,
        _thresholds: Thresholds,
    ) -> Result<Vec<Detection>, DetectorError> {
        Ok(vec![
            Detection {
                class_id: 0,
                confidence: 0.83,
                bbox: BoundingBox::new(2.0, 2.0, 20.0, 20.0),
            },
            Detection {
                class_id: 1,
                confidence: 0.95,
                bbox: BoundingBox::new(30.0, 30.0, 40.0, 40.0),
            },
        ])
    }

    fn name(&self) -> &str {
        "fire-and-light"
    }
}

async fn make_http_state(detector: Arc<dyn Detector>) -> Arc<HttpState> {
    let pool = memory_pool().await.expect("in-memory pool");
    let mut config = FirewatchConfig::default();
    config.events.heartbeat_ms = 20;
    let monitor = Arc::new(MonitorState::new(&config.camera, &config.events));
    let annotator = Arc::new(Annotator::new(detector, &config.detector));
    Arc::new(HttpState {
        pool,
        config,
        monitor,
        annotator,
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn first_chunk(response: axum::response::Response) -> Vec<u8> {
    let mut stream = response.into_body().into_data_stream();
    let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("chunk within timeout")
        .expect("stream not finished")
        .expect("chunk is not an error");
    chunk.to_vec()
}

// ===========================================================================
// TEST 1: start → stop round trip through the router
// ===========================================================================
#[tokio::test]
async fn test_start_stop_session_roundtrip() {
    let state = make_http_state(Arc::new(NullDetector)).await;
    let app = build_router(Arc::clone(&state));

    let started = json_body(app.clone().oneshot(get("/start")).await.unwrap()).await;
    assert_eq!(started["status"], "ok");
    let session_id = started["session_id"].as_i64().expect("numeric session id");

    let again = json_body(app.clone().oneshot(get("/start")).await.unwrap()).await;
    assert_eq!(again["session_id"], session_id);
    assert_eq!(again["already_active"], true);

    let stopped = json_body(app.clone().oneshot(get("/stop")).await.unwrap()).await;
    assert_eq!(stopped["session_id"], session_id);

    let sessions = json_body(app.clone().oneshot(get("/api/sessions")).await.unwrap()).await;
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["status"], "completed");
    assert!(sessions[0]["end_time"].is_string());
}

// ===========================================================================
// TEST 2: /video streams annotated multipart parts and logs the change
// ===========================================================================
#[tokio::test]
async fn test_video_stream_annotates_and_logs() {
    let state = make_http_state(Arc::new(FireAndLight)).await;
    let app = build_router(Arc::clone(&state));

    let started = json_body(app.clone().oneshot(get("/start")).await.unwrap()).await;
    let session_id = started["session_id"].as_i64().unwrap();

    state.monitor.frames.push(Frame::new(RgbImage::new(64, 48)));

    let response = app.clone().oneshot(get("/video")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=frame"
    );

    let chunk = first_chunk(response).await;
    let head = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    assert!(chunk.starts_with(head));
    assert_eq!(&chunk[head.len()..head.len() + 2], &[0xFF, 0xD8]);
    assert!(chunk.ends_with(b"\r\n"));

    let status = json_body(app.clone().oneshot(get("/detection_status")).await.unwrap()).await;
    assert_eq!(status["fire"], 1);
    assert_eq!(status["smoke"], 0);

    let logs = json_body(
        app.clone()
            .oneshot(get(&format!("/api/session/{session_id}")))
            .await
            .unwrap(),
    )
    .await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["fire_count"], 1);
    assert_eq!(logs[0]["alert_triggered"], true);

    let alerts = json_body(app.clone().oneshot(get("/api/detections")).await.unwrap()).await;
    assert_eq!(alerts[0]["type"], "fire");
    assert_eq!(alerts[0]["count"], 1);
}

// ===========================================================================
// TEST 3: /detections delivers queued events, then heartbeats
// ===========================================================================
#[tokio::test]
async fn test_event_stream_event_then_heartbeat() {
    let state = make_http_state(Arc::new(NullDetector)).await;
    let app = build_router(Arc::clone(&state));

    state.monitor.events.publish(DetectionSnapshot::new(1, 2));

    let response = app.clone().oneshot(get("/detections")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let mut stream = response.into_body().into_data_stream();
    let event = stream.next().await.unwrap().unwrap();
    let event = String::from_utf8(event.to_vec()).unwrap();
    assert!(event.starts_with("data:"), "got: {event}");
    assert!(event.contains("\"fire\":1"));
    assert!(event.contains("\"smoke\":2"));

    let idle = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let idle = String::from_utf8(idle.to_vec()).unwrap();
    assert!(idle.starts_with(':'), "got: {idle}");
    assert!(idle.contains("heartbeat"));
}

// ===========================================================================
// TEST 4: streams end once the monitor is closed
// ===========================================================================
#[tokio::test]
async fn test_streams_end_after_shutdown() {
    let state = make_http_state(Arc::new(NullDetector)).await;
    let app = build_router(Arc::clone(&state));
    state.monitor.close();

    let response = app.clone().oneshot(get("/detections")).await.unwrap();
    let mut stream = response.into_body().into_data_stream();
    let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .unwrap();
    assert!(next.is_none());
}

// ===========================================================================
// TEST 5: date-range validation and statistics
// ===========================================================================
#[tokio::test]
async fn test_reports_endpoints() {
    let state = make_http_state(Arc::new(NullDetector)).await;
    let app = build_router(Arc::clone(&state));

    app.clone().oneshot(get("/start")).await.unwrap();
    app.clone().oneshot(get("/stop")).await.unwrap();

    let bad = app
        .clone()
        .oneshot(get("/api/reports/date-range?start_date=tomorrow&end_date=2025-01-01"))
        .await
        .unwrap();
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let hit = json_body(
        app.clone()
            .oneshot(get(&format!(
                "/api/reports/date-range?start_date={today}&end_date={today}"
            )))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(hit.as_array().unwrap().len(), 1);

    let stats = json_body(app.clone().oneshot(get("/api/statistics")).await.unwrap()).await;
    assert_eq!(stats["total_sessions"], 1);
    assert_eq!(stats["recent_sessions"], 1);
    assert_eq!(stats["avg_fire_per_session"], 0.0);

    let limited = json_body(app.clone().oneshot(get("/api/sessions?limit=0")).await.unwrap()).await;
    assert!(limited.as_array().unwrap().is_empty());
}

// ===========================================================================
// TEST 6: static pages and health
// ===========================================================================
#[tokio::test]
async fn test_pages_and_health() {
    let state = make_http_state(Arc::new(NullDetector)).await;
    let app = build_router(Arc::clone(&state));

    for page in ["/", "/reports"] {
        let response = app.clone().oneshot(get(page)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    let health = json_body(app.clone().oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["detector"], "none");
    assert!(health["version"].is_string());
}

// ===========================================================================
// TEST 7: frames left over after /stop are never annotated
// ===========================================================================
#[tokio::test]
async fn test_video_idles_after_stop() {
    let state = make_http_state(Arc::new(FireAndLight)).await;
    let app = build_router(Arc::clone(&state));

    app.clone().oneshot(get("/start")).await.unwrap();
    state.monitor.frames.push(Frame::new(RgbImage::new(32, 32)));
    app.clone().oneshot(get("/stop")).await.unwrap();

    // Queued after stop, as a late capture-loop push would be
    state.monitor.frames.push(Frame::new(RgbImage::new(32, 32)));

    let mut stream = Box::pin(video_stream(Arc::clone(&state)));
    let polled = tokio::time::timeout(Duration::from_millis(300), stream.next()).await;
    assert!(polled.is_err(), "no part is produced while capture is stopped");

    let status = json_body(app.clone().oneshot(get("/detection_status")).await.unwrap()).await;
    assert_eq!(status["fire"], 0);
    assert_eq!(status["smoke"], 0);
    assert_eq!(state.monitor.events.pending(), 0);
}

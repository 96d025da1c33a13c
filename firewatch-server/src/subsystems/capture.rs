//! Capture loop: keeps the newest camera frame in the shared frame queue
//!
//! While capture is enabled the loop holds one open stream and pushes every
//! decoded frame into `MonitorState::frames` (latest frame wins). Recovery
//! policy:
//! - failed read: pause `retry_delay`, reopen after more than
//!   `max_consecutive_failures` in a row
//! - failed open: wait the reconnect backoff (exponential, capped, reset
//!   after a successful connect)
//! - unexpected stream error: pause `error_backoff` and start over
//!
//! While capture is disabled no connection is held; the loop polls the
//! capturing flag every `idle_poll`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use firewatch_core::config::CameraConfig;
use firewatch_core::Frame;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_retry::strategy::ExponentialBackoff;

use crate::state::MonitorState;

// ============================================================================
// Source traits
// ============================================================================

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open {url}: {reason}")]
    Open { url: String, reason: String },

    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Capture stream error: {0}")]
    Stream(String),
}

/// Something that can be connected to and yields frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;
}

/// An open connection. Dropping it releases the connection.
#[async_trait]
pub trait FrameStream: Send {
    /// `Ok(None)` is a failed read (timeout, corrupt frame, peer gone) and
    /// counts towards the reconnect threshold. `Err` is unexpected.
    async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    connected: AtomicBool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStatsSnapshot {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub connected: bool,
}

impl CaptureStats {
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            connected: self.connected.load(Ordering::Relaxed),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }
}

// ============================================================================
// Loop
// ============================================================================

enum PumpExit {
    Disabled,
    Reconnect,
    Shutdown,
}

/// Reconnect delays: `reconnect_delay`, doubling, capped at `max_reconnect_delay`.
fn reconnect_backoff(config: &CameraConfig) -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2)
        .factor((config.reconnect_delay_ms / 2).max(1))
        .max_delay(Duration::from_millis(config.max_reconnect_delay_ms))
}

/// Sleep for `duration`. Returns `true` if shutdown fired first.
async fn pause(duration: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.recv() => true,
    }
}

/// Called from main.rs; runs until the shutdown signal fires.
pub async fn run_capture_loop(
    source: Arc<dyn FrameSource>,
    monitor: Arc<MonitorState>,
    config: CameraConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut backoff = reconnect_backoff(&config);
    let fallback_delay = Duration::from_millis(config.max_reconnect_delay_ms);

    tracing::info!(source = %source.describe(), "Capture loop started");

    loop {
        if monitor.is_closed() {
            break;
        }

        if !monitor.is_capturing() {
            if pause(config.idle_poll(), &mut shutdown).await {
                break;
            }
            continue;
        }

        let mut stream = match source.open().await {
            Ok(stream) => {
                backoff = reconnect_backoff(&config);
                monitor.stats.set_connected(true);
                tracing::info!(source = %source.describe(), "Camera connected");
                stream
            }
            Err(e) => {
                let delay = backoff.next().unwrap_or(fallback_delay);
                tracing::warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Camera open failed"
                );
                if pause(delay, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let outcome = pump_frames(stream.as_mut(), &monitor, &config, &mut shutdown).await;
        drop(stream);
        monitor.stats.set_connected(false);

        match outcome {
            Ok(PumpExit::Shutdown) => break,
            Ok(PumpExit::Disabled) => {
                tracing::debug!("Capture disabled, camera released");
            }
            Ok(PumpExit::Reconnect) => {
                monitor.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    failures = config.max_consecutive_failures + 1,
                    "Too many failed reads, reconnecting"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Capture error");
                if pause(config.error_backoff(), &mut shutdown).await {
                    break;
                }
            }
        }
    }

    monitor.stats.set_connected(false);
    tracing::info!("Capture loop shutting down");
}

async fn pump_frames(
    stream: &mut dyn FrameStream,
    monitor: &MonitorState,
    config: &CameraConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<PumpExit, CaptureError> {
    let mut failures: u32 = 0;

    loop {
        if !monitor.is_capturing() {
            return Ok(PumpExit::Disabled);
        }

        let read = tokio::select! {
            read = stream.read_frame() => read?,
            _ = shutdown.recv() => return Ok(PumpExit::Shutdown),
        };

        match read {
            Some(frame) => {
                failures = 0;
                monitor.stats.frames_captured.fetch_add(1, Ordering::Relaxed);
                monitor.frames.push(frame);
                if pause(config.frame_interval(), shutdown).await {
                    return Ok(PumpExit::Shutdown);
                }
            }
            None => {
                failures += 1;
                monitor.stats.read_failures.fetch_add(1, Ordering::Relaxed);
                if failures > config.max_consecutive_failures {
                    return Ok(PumpExit::Reconnect);
                }
                if pause(config.retry_delay(), shutdown).await {
                    return Ok(PumpExit::Shutdown);
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use firewatch_core::config::EventsConfig;
    use firewatch_core::db::memory_pool;
    use image::RgbImage;
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Script {
        AlwaysFail,
        AlwaysFrame,
        ErrorOnce,
    }

    /// Counts opens and per-stream reads.
    struct ScriptedSource {
        script: Script,
        fail_open: bool,
        reads: Arc<Mutex<Vec<usize>>>,
    }

    impl ScriptedSource {
        fn new(script: Script) -> Self {
            Self {
                script,
                fail_open: false,
                reads: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn opens(&self) -> usize {
            self.reads.lock().unwrap().len()
        }
    }

    struct ScriptedStream {
        script: Script,
        index: usize,
        reads: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn open(&self) -> Result<Box<dyn FrameStream>, CaptureError> {
            if self.fail_open {
                self.reads.lock().unwrap().push(0);
                return Err(CaptureError::Open {
                    url: "mock://".to_string(),
                    reason: "refused".to_string(),
                });
            }
            let mut reads = self.reads.lock().unwrap();
            reads.push(0);
            Ok(Box::new(ScriptedStream {
                script: self.script,
                index: reads.len() - 1,
                reads: Arc::clone(&self.reads),
            }))
        }

        fn describe(&self) -> String {
            "mock".to_string()
        }
    }

    #[async_trait]
    impl FrameStream for ScriptedStream {
        async fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
            let n = {
                let mut reads = self.reads.lock().unwrap();
                reads[self.index] += 1;
                reads[self.index]
            };
            match self.script {
                Script::AlwaysFail => Ok(None),
                Script::AlwaysFrame => Ok(Some(Frame::new(RgbImage::new(4, 4)))),
                Script::ErrorOnce if n == 1 => Err(CaptureError::Stream("boom".to_string())),
                Script::ErrorOnce => Ok(Some(Frame::new(RgbImage::new(4, 4)))),
            }
        }
    }

    fn fast_config() -> CameraConfig {
        CameraConfig {
            retry_delay_ms: 1,
            reconnect_delay_ms: 4,
            max_reconnect_delay_ms: 8,
            error_backoff_ms: 5,
            idle_poll_ms: 5,
            frame_interval_ms: 1,
            ..CameraConfig::default()
        }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    // ========================================================================
    // TEST 1: more than 10 consecutive failed reads trigger a reconnect
    // ========================================================================
    #[tokio::test]
    async fn test_reconnects_after_failure_threshold() {
        let pool = memory_pool().await.unwrap();
        let config = fast_config();
        let monitor = Arc::new(MonitorState::new(&config, &EventsConfig::default()));
        monitor.start(&pool).await.unwrap();

        let source = Arc::new(ScriptedSource::new(Script::AlwaysFail));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_capture_loop(
            source.clone(),
            Arc::clone(&monitor),
            config,
            rx,
        ));

        wait_until(|| source.opens() >= 2).await;
        let _ = tx.send(());
        handle.await.unwrap();

        let first_stream_reads = source.reads.lock().unwrap()[0];
        assert_eq!(first_stream_reads, 11);
        assert!(monitor.stats.snapshot().reconnects >= 1);
        assert!(monitor.frames.is_empty());
    }

    // ========================================================================
    // TEST 2: nothing is opened while capture is disabled
    // ========================================================================
    #[tokio::test]
    async fn test_idle_while_disabled() {
        let config = fast_config();
        let monitor = Arc::new(MonitorState::new(&config, &EventsConfig::default()));
        let source = Arc::new(ScriptedSource::new(Script::AlwaysFrame));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_capture_loop(
            source.clone(),
            Arc::clone(&monitor),
            config,
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = tx.send(());
        handle.await.unwrap();

        assert_eq!(source.opens(), 0);
        assert!(!monitor.stats.snapshot().connected);
    }

    // ========================================================================
    // TEST 3: frames land in the bounded queue, connection released on stop
    // ========================================================================
    #[tokio::test]
    async fn test_frames_pushed_and_released_on_stop() {
        let pool = memory_pool().await.unwrap();
        let config = fast_config();
        let monitor = Arc::new(MonitorState::new(&config, &EventsConfig::default()));
        monitor.start(&pool).await.unwrap();

        let source = Arc::new(ScriptedSource::new(Script::AlwaysFrame));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_capture_loop(
            source.clone(),
            Arc::clone(&monitor),
            config.clone(),
            rx,
        ));

        wait_until(|| monitor.stats.snapshot().frames_captured >= 5).await;
        assert!(monitor.frames.len() <= config.buffer_capacity);
        assert!(monitor.stats.snapshot().connected);

        monitor.stop(&pool).await.unwrap();
        wait_until(|| !monitor.stats.snapshot().connected).await;
        assert_eq!(source.opens(), 1);

        let _ = tx.send(());
        handle.await.unwrap();
    }

    // ========================================================================
    // TEST 4: open failures are retried with backoff
    // ========================================================================
    #[tokio::test]
    async fn test_open_failure_retries() {
        let pool = memory_pool().await.unwrap();
        let config = fast_config();
        let monitor = Arc::new(MonitorState::new(&config, &EventsConfig::default()));
        monitor.start(&pool).await.unwrap();

        let mut source = ScriptedSource::new(Script::AlwaysFrame);
        source.fail_open = true;
        let source = Arc::new(source);
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_capture_loop(
            source.clone(),
            Arc::clone(&monitor),
            config,
            rx,
        ));

        wait_until(|| source.opens() >= 3).await;
        let _ = tx.send(());
        handle.await.unwrap();

        let stats = monitor.stats.snapshot();
        assert_eq!(stats.frames_captured, 0);
        assert!(!stats.connected);
    }

    // ========================================================================
    // TEST 5: an unexpected stream error restarts the connection
    // ========================================================================
    #[tokio::test]
    async fn test_stream_error_restarts() {
        let pool = memory_pool().await.unwrap();
        let config = fast_config();
        let monitor = Arc::new(MonitorState::new(&config, &EventsConfig::default()));
        monitor.start(&pool).await.unwrap();

        let source = Arc::new(ScriptedSource::new(Script::ErrorOnce));
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_capture_loop(
            source.clone(),
            Arc::clone(&monitor),
            config,
            rx,
        ));

        // Each fresh stream errors on its first read, so frames never arrive
        // but the loop keeps reopening.
        wait_until(|| source.opens() >= 2).await;
        let _ = tx.send(());
        handle.await.unwrap();

        assert_eq!(monitor.stats.snapshot().frames_captured, 0);
    }

    #[test]
    fn test_backoff_starts_at_reconnect_delay_and_caps() {
        let config = CameraConfig {
            reconnect_delay_ms: 2000,
            max_reconnect_delay_ms: 8000,
            ..CameraConfig::default()
        };
        let delays: Vec<u64> = reconnect_backoff(&config)
            .take(4)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 8000]);
    }
}

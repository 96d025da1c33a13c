//! Shared monitor state
//!
//! Everything the capture loop, the annotation stage and the HTTP handlers
//! share lives here: the capturing flag, the last snapshot and the active
//! session id behind one mutex, plus the frame and event queues.
//!
//! The mutex is never held across an `.await`. Start/stop additionally take
//! an async lifecycle lock so that session creation and closing cannot
//! interleave.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use firewatch_core::config::{CameraConfig, EventsConfig};
use firewatch_core::{store, DetectionSnapshot, Frame};
use sqlx::SqlitePool;

use crate::subsystems::capture::CaptureStats;
use crate::subsystems::notifier::EventNotifier;
use crate::subsystems::queue::{BoundedQueue, OverflowPolicy};

#[derive(Debug)]
struct MonitorInner {
    capturing: bool,
    snapshot: DetectionSnapshot,
    session_id: Option<i64>,
}

/// Result of `MonitorState::start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    pub session_id: i64,
    pub already_active: bool,
}

/// A snapshot that differs from its predecessor, with the session that was
/// active when the change was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotChange {
    pub snapshot: DetectionSnapshot,
    pub session_id: Option<i64>,
}

#[derive(Debug)]
pub struct MonitorState {
    inner: Mutex<MonitorInner>,
    lifecycle: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    pub frames: BoundedQueue<Frame>,
    pub events: EventNotifier,
    pub stats: CaptureStats,
}

impl MonitorState {
    pub fn new(camera: &CameraConfig, events: &EventsConfig) -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                capturing: false,
                snapshot: DetectionSnapshot::empty(),
                session_id: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            frames: BoundedQueue::new(camera.buffer_capacity, OverflowPolicy::DropOldest),
            events: EventNotifier::new(events.capacity),
            stats: CaptureStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_capturing(&self) -> bool {
        self.lock().capturing
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        self.lock().snapshot
    }

    pub fn active_session(&self) -> Option<i64> {
        self.lock().session_id
    }

    /// Process-wide shutdown: streaming responses end on their next poll.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Replace the snapshot if the counts changed.
    ///
    /// Returns the new snapshot only on a change; identical counts leave the
    /// previous snapshot (and its timestamp) untouched.
    pub fn apply_counts(&self, fire: u32, smoke: u32) -> Option<SnapshotChange> {
        let mut inner = self.lock();
        if !inner.snapshot.counts_differ(fire, smoke) {
            return None;
        }
        inner.snapshot = DetectionSnapshot::new(fire, smoke);
        Some(SnapshotChange {
            snapshot: inner.snapshot,
            session_id: inner.session_id,
        })
    }

    /// Enable capture and open a session.
    ///
    /// Starting while a session is already active is a no-op that returns the
    /// existing session id.
    pub async fn start(&self, pool: &SqlitePool) -> Result<StartOutcome, sqlx::Error> {
        let _guard = self.lifecycle.lock().await;

        {
            let inner = self.lock();
            if let (true, Some(session_id)) = (inner.capturing, inner.session_id) {
                return Ok(StartOutcome {
                    session_id,
                    already_active: true,
                });
            }
        }

        let session_id = store::start_session(pool).await?;

        {
            let mut inner = self.lock();
            inner.capturing = true;
            inner.session_id = Some(session_id);
            inner.snapshot = DetectionSnapshot::empty();
        }
        let stale_events = self.events.clear();
        let stale_frames = self.frames.clear();
        tracing::info!(session_id, stale_events, stale_frames, "Capture started");

        Ok(StartOutcome {
            session_id,
            already_active: false,
        })
    }

    /// Disable capture and close the active session, if any.
    ///
    /// Returns the id of the session that was closed. If closing the session
    /// fails, capture stays enabled with the session still active so that a
    /// later stop can retry.
    pub async fn stop(&self, pool: &SqlitePool) -> Result<Option<i64>, sqlx::Error> {
        let _guard = self.lifecycle.lock().await;

        let (was_capturing, session_id) = {
            let mut inner = self.lock();
            let was_capturing = inner.capturing;
            inner.capturing = false;
            (was_capturing, inner.session_id)
        };

        if let Some(id) = session_id {
            if let Err(e) = store::end_session(pool, id).await {
                self.lock().capturing = was_capturing;
                tracing::error!(session_id = id, error = %e, "Failed to close session, capture left running");
                return Err(e);
            }
        }

        {
            let mut inner = self.lock();
            inner.session_id = None;
            inner.snapshot = DetectionSnapshot::empty();
        }
        let stale_frames = self.frames.clear();
        tracing::info!(session_id = ?session_id, stale_frames, "Capture stopped");

        Ok(session_id)
    }
}

//! Event notifier: best-effort push of snapshot changes
//!
//! A single bounded queue shared by every `/detections` subscriber. Events
//! are dropped when the queue is full and are consumed by whichever
//! subscriber takes them first.

use std::time::Duration;

use firewatch_core::DetectionSnapshot;

use super::queue::{BoundedQueue, OverflowPolicy};

#[derive(Debug)]
pub struct EventNotifier {
    queue: BoundedQueue<DetectionSnapshot>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: BoundedQueue::new(capacity, OverflowPolicy::DropNewest),
        }
    }

    /// Queue an event. Returns `false` when it was dropped.
    pub fn publish(&self, snapshot: DetectionSnapshot) -> bool {
        let queued = self.queue.push(snapshot);
        if !queued {
            tracing::debug!(
                fire = snapshot.fire,
                smoke = snapshot.smoke,
                "Event queue full, dropping detection event"
            );
        }
        queued
    }

    /// Next event, or `None` when nothing arrived within `heartbeat`.
    pub async fn next(&self, heartbeat: Duration) -> Option<DetectionSnapshot> {
        self.queue.pop_timeout(heartbeat).await
    }

    pub fn clear(&self) -> usize {
        self.queue.clear()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

//! Bounded hand-off queue between the capture loop and HTTP consumers.
//!
//! Producers never block: when the queue is full the overflow policy decides
//! which item is lost. Consumers wait with a timeout and treat `None` as
//! "nothing yet".

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict the oldest item to admit the new one (latest frame wins).
    DropOldest,
    /// Reject the new item (best-effort event delivery).
    DropNewest,
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    policy: OverflowPolicy,
    notify: Notify,
    dropped: AtomicU64,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert without blocking. Returns `false` if an item was lost to the
    /// overflow policy (either the evicted oldest or `item` itself).
    pub fn push(&self, item: T) -> bool {
        let admitted_cleanly = {
            let mut items = self.lock();
            if items.len() < self.capacity {
                items.push_back(item);
                true
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(item);
                    }
                    OverflowPolicy::DropNewest => return false,
                }
                false
            }
        };
        self.notify.notify_one();
        admitted_cleanly
    }

    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Wait up to `timeout` for an item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            // notify_one stores a permit when nobody is waiting, so a push
            // between try_pop and here is not lost.
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return self.try_pop();
            }
        }
    }

    /// Discard everything queued. Returns how many items were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let n = items.len();
        items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items lost to the overflow policy since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_drop_oldest_keeps_most_recent() {
        let q = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        for i in 0..5 {
            q.push(i);
        }
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), Some(4));
        assert_eq!(q.try_pop(), None);
        assert_eq!(q.dropped(), 3);
    }

    #[test]
    fn test_drop_oldest_holds_for_any_overflow_length() {
        for capacity in 1..4usize {
            for total in 0..12usize {
                let q = BoundedQueue::new(capacity, OverflowPolicy::DropOldest);
                for i in 0..total {
                    q.push(i);
                }
                let drained: Vec<usize> = std::iter::from_fn(|| q.try_pop()).collect();
                let expected: Vec<usize> = (total.saturating_sub(capacity)..total).collect();
                assert_eq!(drained, expected, "capacity={capacity} total={total}");
            }
        }
    }

    #[test]
    fn test_drop_newest_rejects_when_full() {
        let q = BoundedQueue::new(10, OverflowPolicy::DropNewest);
        for i in 0..10 {
            assert!(q.push(i));
        }
        assert!(!q.push(10));
        assert!(!q.push(11));
        assert_eq!(q.len(), 10);
        assert_eq!(q.try_pop(), Some(0));
        assert_eq!(q.dropped(), 2);
    }

    #[test]
    fn test_clear() {
        let q = BoundedQueue::new(4, OverflowPolicy::DropNewest);
        q.push("a");
        q.push("b");
        assert_eq!(q.clear(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let q = BoundedQueue::new(0, OverflowPolicy::DropOldest);
        assert_eq!(q.capacity(), 1);
        q.push(1);
        q.push(2);
        assert_eq!(q.try_pop(), Some(2));
    }

    #[tokio::test]
    async fn test_pop_timeout_expires_on_empty_queue() {
        let q: BoundedQueue<u8> = BoundedQueue::new(2, OverflowPolicy::DropOldest);
        let started = std::time::Instant::now();
        assert_eq!(q.pop_timeout(Duration::from_millis(30)).await, None);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_pop_timeout_wakes_on_push() {
        let q = Arc::new(BoundedQueue::new(2, OverflowPolicy::DropOldest));
        let consumer = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.pop_timeout(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(42u32);
        let got = consumer.await.unwrap();
        assert_eq!(got, Some(42));
    }
}

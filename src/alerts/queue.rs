//! Bounded, drop-on-full alert queue
//!
//! Producers call [`AlertQueue::enqueue`], which never waits: a full buffer
//! drops the alert and reports `false`. A single [`AlertReceiver`] drains the
//! buffer in FIFO order. Closing the queue rejects new alerts while leaving
//! already-buffered ones for the receiver.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

use super::model::Alert;

/// Default number of buffered alerts
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

struct QueueInner {
    /// `None` once the queue has been closed
    sender: RwLock<Option<mpsc::Sender<Alert>>>,
    capacity: usize,
    /// Last issued numeric ID, keeps IDs strictly increasing
    last_id: AtomicI64,
    pending: AtomicUsize,
    accepted: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    closed: AtomicBool,
}

/// Producer handle. Cheap to clone; all clones share the same buffer.
#[derive(Clone)]
pub struct AlertQueue {
    inner: Arc<QueueInner>,
}

/// Consumer half of an [`AlertQueue`]
pub struct AlertReceiver {
    rx: mpsc::Receiver<Alert>,
    inner: Arc<QueueInner>,
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub capacity: usize,
    pub pending: usize,
    pub accepted: u64,
    /// Dropped because the buffer was full
    pub dropped: u64,
    /// Rejected because the queue was closed
    pub rejected: u64,
    pub closed: bool,
}

impl AlertQueue {
    /// Create a queue holding at most `capacity` alerts
    pub fn bounded(capacity: usize) -> (Self, AlertReceiver) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let inner = Arc::new(QueueInner {
            sender: RwLock::new(Some(tx)),
            capacity,
            last_id: AtomicI64::new(0),
            pending: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        (
            Self {
                inner: Arc::clone(&inner),
            },
            AlertReceiver { rx, inner },
        )
    }

    /// Assign an ID and try to buffer the alert. Never blocks.
    ///
    /// Returns `false` when the buffer is full (the alert is dropped) or the
    /// queue has been closed.
    pub fn enqueue(&self, mut alert: Alert) -> bool {
        let guard = self.inner.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(title = %alert.title, "Alert queue closed, rejecting alert");
            return false;
        };

        alert.id = self.next_id();
        let alert_id = alert.id.clone();

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(alert) {
            Ok(()) => {
                self.inner.accepted.fetch_add(1, Ordering::Relaxed);
                tracing::info!(alert_id = %alert_id, "Alert queued");
                true
            }
            Err(TrySendError::Full(alert)) => {
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    alert_id = %alert_id,
                    title = %alert.title,
                    "Alert queue full, dropping alert"
                );
                false
            }
            Err(TrySendError::Closed(alert)) => {
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    alert_id = %alert_id,
                    title = %alert.title,
                    "Alert consumer gone, rejecting alert"
                );
                false
            }
        }
    }

    /// Stop accepting alerts. Buffered alerts stay available to the receiver.
    ///
    /// Returns `true` if this call closed the queue.
    pub fn close(&self) -> bool {
        let closed = self.inner.sender.write().take().is_some();
        if closed {
            self.inner.closed.store(true, Ordering::SeqCst);
            tracing::info!(pending = self.len(), "Alert queue closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of buffered alerts not yet received
    pub fn len(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            capacity: self.inner.capacity,
            pending: self.len(),
            accepted: self.inner.accepted.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            rejected: self.inner.rejected.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    /// `ALERT-<n>` where `n` is the wall clock in nanoseconds, bumped past
    /// the previous ID when the clock has not advanced.
    fn next_id(&self) -> String {
        let now = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX - 1);
        let prev = self
            .inner
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        format!("ALERT-{}", now.max(prev + 1))
    }
}

impl AlertReceiver {
    /// Wait for the next alert. Returns `None` once the queue is closed and
    /// the buffer is empty.
    pub async fn recv(&mut self) -> Option<Alert> {
        let alert = self.rx.recv().await;
        if alert.is_some() {
            self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        }
        alert
    }

    /// Take the next buffered alert without waiting
    pub fn try_recv(&mut self) -> Option<Alert> {
        match self.rx.try_recv() {
            Ok(alert) => {
                self.inner.pending.fetch_sub(1, Ordering::SeqCst);
                Some(alert)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::model::Severity;

    fn make_alert(title: &str) -> Alert {
        Alert::new(Severity::High, title, "test alert", "CSO-001")
    }

    #[test]
    fn test_capacity_two_third_enqueue_fails() {
        let (queue, _rx) = AlertQueue::bounded(2);

        assert!(queue.enqueue(make_alert("a")));
        assert!(queue.enqueue(make_alert("b")));
        assert!(!queue.enqueue(make_alert("c")));

        let stats = queue.stats();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.pending, 2);
    }

    #[test]
    fn test_overflow_without_consumer() {
        let capacity = 10;
        let (queue, _rx) = AlertQueue::bounded(capacity);

        let results: Vec<bool> = (0..25)
            .map(|i| queue.enqueue(make_alert(&format!("alert-{}", i))))
            .collect();

        assert_eq!(results.iter().filter(|ok| **ok).count(), capacity);
        assert_eq!(results.iter().filter(|ok| !**ok).count(), 25 - capacity);
    }

    #[tokio::test]
    async fn test_fifo_order_and_ids() {
        let (queue, mut rx) = AlertQueue::bounded(100);

        for i in 0..50 {
            assert!(queue.enqueue(make_alert(&format!("alert-{}", i))));
        }
        queue.close();

        let mut received = Vec::new();
        while let Some(alert) = rx.recv().await {
            received.push(alert);
        }

        assert_eq!(received.len(), 50);
        for (i, alert) in received.iter().enumerate() {
            assert_eq!(alert.title, format!("alert-{}", i));
            assert!(alert.id.starts_with("ALERT-"));
        }

        // IDs are unique and strictly increasing within a queue
        let ids: Vec<i64> = received
            .iter()
            .map(|a| a.id.trim_start_matches("ALERT-").parse().unwrap())
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_after_close_rejected() {
        let (queue, mut rx) = AlertQueue::bounded(4);

        assert!(queue.enqueue(make_alert("before")));
        assert!(queue.close());
        assert!(!queue.close());
        assert!(queue.is_closed());

        assert!(!queue.enqueue(make_alert("after")));
        assert_eq!(queue.stats().rejected, 1);

        // Buffered alert survives the close
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.title, "before");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_consumer_dropped_rejects() {
        let (queue, rx) = AlertQueue::bounded(4);
        drop(rx);

        assert!(!queue.enqueue(make_alert("orphan")));
        assert_eq!(queue.stats().rejected, 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let (queue, _rx) = AlertQueue::bounded(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.enqueue(make_alert("only")));
        assert!(!queue.enqueue(make_alert("overflow")));
    }
}

//! Bounded queue with bounded-wait-then-drop semantics.
//!
//! Producers wait at most `wait` for free capacity; after that the item is
//! discarded and counted. Used by the dispatcher and by plugins so a slow
//! consumer can never stall the producer indefinitely.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};

/// Outcome of a bounded-wait push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Enqueued {
    /// Item is queued for the consumer.
    Accepted,
    /// Queue stayed full for the whole wait; item dropped.
    TimedOut,
    /// Consumer is gone; item dropped.
    Closed,
}

impl Enqueued {
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Create a bounded queue. A zero capacity is raised to one.
pub fn bounded<T>(capacity: usize, wait: Duration) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender {
            tx,
            wait,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        QueueReceiver { rx },
    )
}

/// Producer side.
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
    wait: Duration,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            wait: self.wait,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> std::fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSender")
            .field("capacity", &self.tx.max_capacity())
            .field("wait", &self.wait)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> QueueSender<T> {
    /// Push an item, waiting up to the configured bound for space.
    pub async fn push(&self, item: T) -> Enqueued {
        match self.tx.send_timeout(item, self.wait).await {
            Ok(()) => Enqueued::Accepted,
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueued::TimedOut
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Enqueued::Closed
            }
        }
    }

    /// Number of items dropped since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Items currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Receive the next item; `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop accepting new items. Already queued items can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_and_receive() {
        let (tx, mut rx) = bounded(2, Duration::from_millis(50));
        assert_eq!(tx.push(1).await, Enqueued::Accepted);
        assert_eq!(tx.push(2).await, Enqueued::Accepted);
        assert_eq!(tx.len(), 2);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert!(tx.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_after_wait() {
        let (tx, _rx) = bounded(1, Duration::from_millis(50));
        assert!(tx.push("a").await.is_accepted());

        let start = std::time::Instant::now();
        assert_eq!(tx.push("b").await, Enqueued::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(tx.dropped(), 1);
    }

    #[tokio::test]
    async fn test_waiting_push_succeeds_when_space_frees() {
        let (tx, mut rx) = bounded(1, Duration::from_secs(2));
        assert!(tx.push(1).await.is_accepted());

        let consumer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let first = rx.recv().await;
            let second = rx.recv().await;
            (first, second)
        });

        assert_eq!(tx.push(2).await, Enqueued::Accepted);
        assert_eq!(consumer.await.unwrap(), (Some(1), Some(2)));
        assert_eq!(tx.dropped(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = bounded::<u8>(4, Duration::from_millis(10));
        drop(rx);
        assert_eq!(tx.push(1).await, Enqueued::Closed);
        assert_eq!(tx.dropped(), 1);
    }
}

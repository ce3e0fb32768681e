//! Reference notifier plugin.
//!
//! `process` pushes the record onto a bounded queue (default 50 entries, 1s
//! wait). A dedicated task drains the queue, renders a [`Message`] and hands
//! it to the configured [`Transport`]. Delivery is best effort: failures are
//! logged and not retried.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::plugin::{NotifyError, Plugin};
use crate::queue::{self, Enqueued, QueueReceiver, QueueSender};
use crate::record::{Record, SharedRecord, truncate_chars};

/// Default notifier queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Default bounded wait when the notifier queue is full.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for the delivery task to finish on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Marker substituted for encoded payloads that do not fit the message.
pub const PAYLOAD_TOO_LARGE: &str = "payload size exceeds the limit";

/// Outbound delivery surface for notifications.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Provider name used in logs.
    fn name(&self) -> &str;

    /// Maximum message body length in characters.
    fn max_message_len(&self) -> usize;

    /// Submit one message.
    async fn send(&self, message: &Message) -> Result<(), NotifyError>;
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
    /// Record creation time, unix seconds.
    pub timestamp: i64,
}

impl Message {
    /// Render a record, keeping the body within `max_len` characters.
    pub fn from_record(record: &Record, max_len: usize) -> Self {
        let id = record.id().to_string();
        let title = [
            Some(id.as_str()),
            record.subject(),
            record.sender(),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_owned();

        let mut body = String::new();
        if let Some(sender) = record.sender() {
            body.push_str(&format!("From: {sender}\n"));
        }
        if let Some(subject) = record.subject() {
            body.push_str(&format!("Subject: {subject}\n"));
        }

        if !record.payload().is_empty() {
            let text = record.payload_text();
            let overflow = text.chars().count() + body.chars().count() + 3 > max_len;
            if !record.is_printable() && overflow {
                body.push_str(&format!("\n{PAYLOAD_TOO_LARGE}\n"));
            } else {
                body.push_str(&format!("\n{text}\n"));
            }
        }

        let body = truncate_chars(&body, max_len).to_owned();

        Self {
            title,
            body,
            timestamp: record.created_at().timestamp(),
        }
    }
}

/// Notification plugin with its own bounded queue and delivery task.
pub struct Notifier {
    name: String,
    queue: QueueSender<SharedRecord>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Start a notifier with the default queue settings.
    pub fn spawn<T: Transport>(transport: T) -> Self {
        Self::with_queue(transport, DEFAULT_QUEUE_CAPACITY, DEFAULT_ENQUEUE_TIMEOUT)
    }

    /// Start a notifier with an explicit queue capacity and enqueue wait.
    pub fn with_queue<T: Transport>(transport: T, capacity: usize, wait: Duration) -> Self {
        let name = format!("notifier.{}", transport.name());
        let (tx, rx) = queue::bounded(capacity, wait);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(deliver_loop(
            Arc::new(transport),
            rx,
            shutdown.clone(),
            name.clone(),
        ));

        Self {
            name,
            queue: tx,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Records dropped because the queue stayed full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

#[async_trait]
impl Plugin for Notifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: SharedRecord) -> Enqueued {
        let id = record.id();
        let outcome = self.queue.push(record).await;
        if !outcome.is_accepted() {
            tracing::error!(plugin = %self.name, id = %id, outcome = ?outcome, "Notifier queue full, dropping record");
        }
        outcome
    }

    async fn close(&self) {
        self.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut task) = task else {
            return;
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(Ok(())) => tracing::info!(plugin = %self.name, "Notifier stopped"),
            Ok(Err(e)) => tracing::error!(plugin = %self.name, error = %e, "Notifier task failed"),
            Err(_) => {
                tracing::warn!(plugin = %self.name, "Notifier did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

async fn deliver_loop(
    transport: Arc<dyn Transport>,
    mut rx: QueueReceiver<SharedRecord>,
    shutdown: CancellationToken,
    name: String,
) {
    tracing::debug!(plugin = %name, "Notifier started");

    loop {
        let record = tokio::select! {
            _ = shutdown.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        let message = Message::from_record(&record, transport.max_message_len());
        match transport.send(&message).await {
            Ok(()) => tracing::debug!(plugin = %name, id = %record.id(), "Notification sent"),
            Err(e) => {
                tracing::error!(plugin = %name, id = %record.id(), error = %e, "Notification failed")
            }
        }
    }

    rx.close();
}

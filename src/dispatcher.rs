//! Record fan-out to registered plugins.
//!
//! Ingestion pushes each stored record onto a bounded queue; one dispatch task
//! drains it and calls [`Plugin::process`] on every registered plugin in
//! registration order, holding the plugin list's read lock for the pass.
//! When the queue stays full past the enqueue wait the record is dropped from
//! live delivery only; it is already durable in the store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::plugin::Plugin;
use crate::queue::{self, Enqueued, QueueReceiver, QueueSender};
use crate::record::SharedRecord;

/// Default dispatch queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default bounded wait for a full dispatch queue.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for the dispatch task to finish its current pass on shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_enqueue_timeout() -> Duration {
    DEFAULT_ENQUEUE_TIMEOUT
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Queue capacity (default: 100).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Bounded wait when the queue is full (default: 1s).
    #[serde(default = "default_enqueue_timeout", with = "humantime_serde")]
    pub enqueue_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

type PluginList = Arc<RwLock<Vec<Arc<dyn Plugin>>>>;

/// Bounded fan-out from ingestion to plugins. Owns the plugin lifecycle.
pub struct Dispatcher {
    queue: QueueSender<SharedRecord>,
    plugins: PluginList,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("queue", &self.queue)
            .field(
                "plugin_count",
                &self.plugins.try_read().map(|p| p.len()).unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Start a dispatcher with its own shutdown signal.
    pub fn new(config: &DispatcherConfig) -> Self {
        Self::spawn(config, CancellationToken::new())
    }

    /// Start a dispatcher whose loop also stops when `shutdown` fires.
    ///
    /// Plugins are closed only by [`shutdown`](Self::shutdown).
    pub fn spawn(config: &DispatcherConfig, shutdown: CancellationToken) -> Self {
        let (tx, rx) = queue::bounded(config.queue_capacity, config.enqueue_timeout);
        let plugins: PluginList = Arc::new(RwLock::new(Vec::new()));
        let shutdown = shutdown.child_token();
        let task = tokio::spawn(dispatch_loop(rx, Arc::clone(&plugins), shutdown.clone()));

        tracing::info!(
            capacity = config.queue_capacity,
            enqueue_timeout = ?config.enqueue_timeout,
            "Dispatcher started"
        );

        Self {
            queue: tx,
            plugins,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Hand a stored record to the fan-out queue.
    ///
    /// Waits at most the configured enqueue timeout. A drop is logged and
    /// reported but never fails the caller.
    pub async fn enqueue(&self, record: SharedRecord) -> Enqueued {
        let id = record.id();
        let outcome = self.queue.push(record).await;
        if !outcome.is_accepted() {
            tracing::error!(id = %id, outcome = ?outcome, dropped = self.queue.dropped(), "Dispatch queue busy, record dropped");
        }
        outcome
    }

    /// Append a plugin. Plugins registered after shutdown are closed immediately.
    pub async fn register<P: Plugin>(&self, plugin: P) {
        self.register_shared(Arc::new(plugin)).await;
    }

    /// Append an already shared plugin.
    pub async fn register_shared(&self, plugin: Arc<dyn Plugin>) {
        {
            // Checked under the lock: shutdown cancels before it reads the list to close it.
            let mut plugins = self.plugins.write().await;
            if !self.shutdown.is_cancelled() {
                let name = plugin.name().to_owned();
                plugins.push(plugin);
                tracing::info!(plugin = %name, position = plugins.len(), "Plugin registered");
                return;
            }
        }

        tracing::warn!(plugin = %plugin.name(), "Dispatcher is shut down, closing late plugin");
        plugin.close().await;
    }

    /// Number of registered plugins.
    pub async fn plugin_count(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Records dropped because the queue stayed full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stop dispatching and close every plugin. Only the first call does work.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await;
    }

    /// Shutdown with a custom wait for the in-flight dispatch pass.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        self.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut task) = task else {
            return;
        };

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Dispatch task failed"),
            Err(_) => {
                tracing::warn!("Dispatch pass did not finish in time, aborting");
                task.abort();
            }
        }

        let plugins = self.plugins.read().await;
        for plugin in plugins.iter() {
            plugin.close().await;
            tracing::debug!(plugin = %plugin.name(), "Plugin closed");
        }
        tracing::info!(plugin_count = plugins.len(), dropped = self.dropped(), "Dispatcher shutdown complete");
    }
}

async fn dispatch_loop(
    mut rx: QueueReceiver<SharedRecord>,
    plugins: PluginList,
    shutdown: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
        };

        let plugins = plugins.read().await;
        for plugin in plugins.iter() {
            let outcome = plugin.process(Arc::clone(&record)).await;
            if !outcome.is_accepted() {
                tracing::warn!(plugin = %plugin.name(), id = %record.id(), outcome = ?outcome, "Plugin did not accept record");
            }
        }
    }

    rx.close();
    tracing::debug!("Dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;
    use uuid::Uuid;

    /// Records every id it sees and logs its name into a shared call log.
    struct CollectingPlugin {
        name: String,
        seen: Arc<Mutex<Vec<Uuid>>>,
        calls: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl CollectingPlugin {
        fn new(name: &str, calls: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_owned(),
                seen: Arc::default(),
                calls: Arc::clone(calls),
                closed: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Plugin for CollectingPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        async fn process(&self, record: SharedRecord) -> Enqueued {
            self.seen.lock().unwrap().push(record.id());
            self.calls.lock().unwrap().push(self.name.clone());
            Enqueued::Accepted
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Stalls briefly and then drops every record.
    struct DroppingPlugin;

    #[async_trait]
    impl Plugin for DroppingPlugin {
        fn name(&self) -> &str {
            "dropping"
        }

        async fn process(&self, _record: SharedRecord) -> Enqueued {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Enqueued::TimedOut
        }

        async fn close(&self) {}
    }

    /// Blocks every call until the gate is opened.
    struct GatedPlugin {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Plugin for GatedPlugin {
        fn name(&self) -> &str {
            "gated"
        }

        async fn process(&self, _record: SharedRecord) -> Enqueued {
            let _permit = self.gate.acquire().await;
            Enqueued::Accepted
        }

        async fn close(&self) {}
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_healthy_plugin_receives_all_despite_dropping_peer() {
        let dispatcher = Dispatcher::new(&DispatcherConfig::default());
        let calls = Arc::default();
        let healthy = CollectingPlugin::new("healthy", &calls);
        let seen = Arc::clone(&healthy.seen);

        dispatcher.register(DroppingPlugin).await;
        dispatcher.register(healthy).await;
        assert_eq!(dispatcher.plugin_count().await, 2);

        let mut ids = Vec::new();
        for i in 0..10 {
            let record = Arc::new(Record::new(format!("r{i}")));
            ids.push(record.id());
            assert!(dispatcher.enqueue(record).await.is_accepted());
        }

        wait_until(|| seen.lock().unwrap().len() == ids.len()).await;
        assert_eq!(*seen.lock().unwrap(), ids);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_plugins_called_in_registration_order() {
        let dispatcher = Dispatcher::new(&DispatcherConfig::default());
        let calls: Arc<Mutex<Vec<String>>> = Arc::default();
        dispatcher.register(CollectingPlugin::new("first", &calls)).await;
        dispatcher.register(CollectingPlugin::new("second", &calls)).await;

        for _ in 0..2 {
            let _ = dispatcher.enqueue(Arc::new(Record::new("x"))).await;
        }
        wait_until(|| calls.lock().unwrap().len() == 4).await;

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["first", "second", "first", "second"]
        );
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_saturated_queue_returns_within_bound() {
        let config = DispatcherConfig {
            queue_capacity: 1,
            enqueue_timeout: Duration::from_millis(50),
        };
        let dispatcher = Dispatcher::new(&config);
        let gate = Arc::new(Semaphore::new(0));
        dispatcher
            .register(GatedPlugin {
                gate: Arc::clone(&gate),
            })
            .await;

        // First record blocks the dispatch pass, second fills the queue.
        assert!(dispatcher.enqueue(Arc::new(Record::new("1"))).await.is_accepted());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dispatcher.enqueue(Arc::new(Record::new("2"))).await.is_accepted());

        let started = std::time::Instant::now();
        let outcome = dispatcher.enqueue(Arc::new(Record::new("3"))).await;
        assert_eq!(outcome, Enqueued::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(dispatcher.dropped(), 1);

        gate.add_permits(10);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_plugins_once() {
        let dispatcher = Dispatcher::new(&DispatcherConfig::default());
        let calls = Arc::default();
        let a = CollectingPlugin::new("a", &calls);
        let b = CollectingPlugin::new("b", &calls);
        let (closed_a, closed_b) = (Arc::clone(&a.closed), Arc::clone(&b.closed));
        dispatcher.register(a).await;
        dispatcher.register(b).await;

        dispatcher.shutdown().await;
        dispatcher.shutdown().await;

        assert_eq!(closed_a.load(Ordering::SeqCst), 1);
        assert_eq!(closed_b.load(Ordering::SeqCst), 1);
        assert_eq!(
            dispatcher.enqueue(Arc::new(Record::new("late"))).await,
            Enqueued::Closed
        );
    }

    #[tokio::test]
    async fn test_late_registration_is_closed() {
        let dispatcher = Dispatcher::new(&DispatcherConfig::default());
        dispatcher.shutdown().await;

        let calls = Arc::default();
        let late = CollectingPlugin::new("late", &calls);
        let closed = Arc::clone(&late.closed);
        dispatcher.register(late).await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.plugin_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_registration_racing_shutdown_is_always_closed() {
        for _ in 0..20 {
            let dispatcher = Arc::new(Dispatcher::new(&DispatcherConfig::default()));
            let calls: Arc<Mutex<Vec<String>>> = Arc::default();

            let mut closed = Vec::new();
            let mut tasks = Vec::new();
            for i in 0..16 {
                let plugin = CollectingPlugin::new(&format!("p{i}"), &calls);
                closed.push(Arc::clone(&plugin.closed));
                let dispatcher = Arc::clone(&dispatcher);
                tasks.push(tokio::spawn(async move { dispatcher.register(plugin).await }));
            }
            let stopper = {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move { dispatcher.shutdown().await })
            };

            for task in tasks {
                task.await.unwrap();
            }
            stopper.await.unwrap();

            for count in &closed {
                assert_eq!(count.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_parent_token_stops_loop() {
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::spawn(&DispatcherConfig::default(), token.clone());
        token.cancel();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            dispatcher.enqueue(Arc::new(Record::new("x"))).await,
            Enqueued::Closed
        );
        dispatcher.shutdown().await;
    }
}

//! Chatfeed public API façade (in-process).
//!
//! This crate defines the surface a view layer depends on: lifecycle control,
//! message submission and read access to the published feed.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use chatfeed_core::{diagnostics_text_buffered, ChatMessage, ConfigError, FeedConfig, FeedSnapshot};
use chatfeed_store::{spawn_aggregator, spawn_reaper, FeedHandle, FeedStore, IngestBuffer};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod source;

pub use source::DEFAULT_AUTHOR;

/// Chat feed surface consumed by frontends.
pub trait ChatFeedApi: Send + Sync {
    /// Spawn the generator, aggregation and reaper loops on `rt`.
    /// No-op (returns `false`) when already running.
    fn start(&self, rt: &Handle) -> bool;

    /// Signal all loops to exit. Returns `false` when already stopped.
    fn stop(&self) -> bool;

    fn is_running(&self) -> bool;

    /// Inject an already-built message through the ingestion path.
    fn submit(&self, message: ChatMessage);

    /// Submit `text` as `author`. Blank text is rejected and returns `false`.
    fn send_user_message_as(&self, text: &str, author: &str) -> bool;

    fn send_user_message(&self, text: &str) -> bool {
        self.send_user_message_as(text, DEFAULT_AUTHOR)
    }

    fn reset_evicted_count(&self);

    /// Current published view (messages, eviction count, diagnostics).
    fn snapshot(&self) -> Arc<FeedSnapshot>;

    /// Epoch channel that ticks on every publish.
    fn subscribe(&self) -> watch::Receiver<u64>;

    /// Diagnostics including the live ingestion backlog.
    fn memory_info(&self) -> String;
}

struct Run {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// In-process feed that owns the pipeline and its three background loops.
pub struct InProcFeed {
    config: FeedConfig,
    buffer: Arc<IngestBuffer>,
    store: Arc<FeedStore>,
    handle: FeedHandle,
    run: Mutex<Option<Run>>,
}

impl InProcFeed {
    pub fn new(config: FeedConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let buffer = Arc::new(IngestBuffer::with_capacity(config.queue_cap));
        let store = Arc::new(
            FeedStore::new(config.max_messages, config.publish_every).with_max_age(config.max_age_chrono()),
        );
        let handle = store.handle();
        Ok(Self { config, buffer, store, handle, run: Mutex::new(None) })
    }

    pub fn config(&self) -> &FeedConfig { &self.config }

    /// Reader handle for the published view.
    pub fn handle(&self) -> FeedHandle { self.handle.clone() }

    /// Messages waiting for the next aggregation pass.
    pub fn buffered(&self) -> usize { self.buffer.len() }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn halt(&self) -> Option<Run> {
        let run = self.lock_run().take()?;
        self.store.halt();
        run.stop_tx.send_replace(true);
        Some(run)
    }

    /// Stop and wait for every loop task to finish.
    pub async fn shutdown(&self) {
        let Some(run) = self.halt() else { return };
        for task in run.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "feed task ended abnormally");
            }
        }
        info!("feed shut down");
    }
}

impl ChatFeedApi for InProcFeed {
    fn start(&self, rt: &Handle) -> bool {
        let mut slot = self.lock_run();
        if slot.is_some() {
            debug!("start ignored; feed already running");
            return false;
        }
        let c = &self.config;
        let token = self.store.begin_run();
        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = vec![
            source::spawn_generator(rt, Arc::clone(&self.buffer), c.generator_every, stop_rx.clone()),
            spawn_aggregator(rt, Arc::clone(&self.store), Arc::clone(&self.buffer), token, c.aggregate_every, stop_rx.clone()),
            spawn_reaper(rt, Arc::clone(&self.store), token, c.cleanup_every, c.max_age_chrono(), stop_rx),
        ];
        *slot = Some(Run { stop_tx, tasks });
        info!(
            cap = c.max_messages,
            queue_cap = c.queue_cap,
            generator_ms = %c.generator_every.as_millis(),
            publish_ms = %c.publish_every.as_millis(),
            "feed started"
        );
        true
    }

    fn stop(&self) -> bool {
        match self.halt() {
            Some(_) => {
                info!("feed stopped");
                true
            }
            None => false,
        }
    }

    fn is_running(&self) -> bool { self.lock_run().is_some() }

    fn submit(&self, message: ChatMessage) {
        self.buffer.offer(message);
    }

    fn send_user_message_as(&self, text: &str, author: &str) -> bool {
        match source::user_message(text, author) {
            Some(msg) => {
                debug!(author = %msg.author, id = msg.id, "user message submitted");
                self.submit(msg);
                true
            }
            None => false,
        }
    }

    fn reset_evicted_count(&self) {
        self.store.reset_evicted();
        debug!("evicted count reset");
    }

    fn snapshot(&self) -> Arc<FeedSnapshot> { self.handle.current() }

    fn subscribe(&self) -> watch::Receiver<u64> { self.handle.subscribe_epoch() }

    fn memory_info(&self) -> String {
        diagnostics_text_buffered(self.handle.current().len(), self.buffer.len(), self.config.max_messages)
    }
}

impl Drop for InProcFeed {
    fn drop(&mut self) {
        self.halt();
    }
}

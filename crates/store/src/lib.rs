//! Chatfeed store: ingestion buffer, capped aggregation, throttled publication
//! and age-based reaping over a single published snapshot.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwap;
use chatfeed_core::{ChatMessage, FeedSnapshot};
use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

mod aggregate;
mod buffer;
mod throttle;

pub use aggregate::Aggregator;
pub use buffer::IngestBuffer;
pub use throttle::PublishThrottle;

/// Identifies one Running period. Passes carrying a stale token are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken(u64);

/// Result of one aggregation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// The run this pass belongs to has ended. The batch was kept for the
    /// next run but nothing was published.
    Halted,
    Applied { accepted: usize, trimmed: usize, expired: usize, published: bool },
}

struct Inner {
    agg: Aggregator,
    throttle: PublishThrottle,
    generation: u64,
    running: bool,
    epoch: u64,
}

impl Inner {
    fn is_live(&self, run: RunToken) -> bool {
        self.running && self.generation == run.0
    }
}

/// Owner of the retained list and the published snapshot.
///
/// All mutations go through one short-lived lock and end with an atomic
/// snapshot swap, so readers never see a list without its matching count.
pub struct FeedStore {
    inner: Mutex<Inner>,
    snap: Arc<ArcSwap<FeedSnapshot>>,
    epoch_tx: watch::Sender<u64>,
    max_age: Option<chrono::Duration>,
}

fn cutoff_for(max_age: chrono::Duration) -> DateTime<Utc> {
    Utc::now().checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl FeedStore {
    pub fn new(cap: usize, publish_every: Duration) -> Self {
        let agg = Aggregator::with_cap(cap);
        let initial = agg.freeze(0);
        let (epoch_tx, _) = watch::channel(0u64);
        Self {
            inner: Mutex::new(Inner {
                agg,
                throttle: PublishThrottle::new(publish_every),
                generation: 0,
                running: false,
                epoch: 0,
            }),
            snap: Arc::new(ArcSwap::from_pointee(initial)),
            epoch_tx,
            max_age: None,
        }
    }

    /// Reject incoming messages already older than `max_age` at fold time.
    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn handle(&self) -> FeedHandle {
        FeedHandle { snap: Arc::clone(&self.snap), epoch_rx: self.epoch_tx.subscribe() }
    }

    pub fn current(&self) -> Arc<FeedSnapshot> { self.snap.load_full() }

    pub fn is_running(&self) -> bool { self.lock().running }

    pub fn is_live(&self, run: RunToken) -> bool { self.lock().is_live(run) }

    /// Open a new Running period and invalidate any previous token.
    pub fn begin_run(&self) -> RunToken {
        let mut g = self.lock();
        g.generation += 1;
        g.running = true;
        RunToken(g.generation)
    }

    /// End the current Running period. Once this returns no pass can publish
    /// until the next `begin_run`. Returns whether a run was active.
    pub fn halt(&self) -> bool {
        let mut g = self.lock();
        let was = g.running;
        g.running = false;
        g.generation += 1;
        was
    }

    /// Fold `batch` into the retained list and publish if the throttle allows.
    ///
    /// A batch drained just before the run was halted is still folded so it
    /// is published by the next run; only the publish is skipped.
    pub fn aggregate(&self, run: RunToken, batch: Vec<ChatMessage>, now: Instant) -> Pass {
        let mut g = self.lock();
        let live = g.is_live(run);
        let accepted = batch.len();
        let (trimmed, expired) = match self.max_age {
            Some(age) => g.agg.fold_fresh(batch, cutoff_for(age)),
            None => (g.agg.fold(batch), 0),
        };
        if accepted > 0 {
            metrics::histogram!("chat_aggregate_batch", accepted as f64);
            g.throttle.mark();
        }
        if trimmed > 0 {
            metrics::counter!("chat_evicted_total", trimmed as u64, "reason" => "cap");
        }
        if expired > 0 {
            metrics::counter!("chat_evicted_total", expired as u64, "reason" => "age");
        }
        if !live {
            return Pass::Halted;
        }
        let published = if g.throttle.ready(now) {
            self.publish_locked(&mut g, now);
            true
        } else {
            false
        };
        Pass::Applied { accepted, trimmed, expired, published }
    }

    /// Remove messages created before `cutoff` and republish right away.
    /// Returns `None` when the run has ended.
    pub fn reap(&self, run: RunToken, cutoff: DateTime<Utc>) -> Option<usize> {
        let mut g = self.lock();
        if !g.is_live(run) {
            return None;
        }
        let removed = g.agg.reap(cutoff);
        if removed > 0 {
            metrics::counter!("chat_evicted_total", removed as u64, "reason" => "age");
            self.publish_locked(&mut g, Instant::now());
        }
        Some(removed)
    }

    /// Zero the eviction counter and republish so readers observe it.
    pub fn reset_evicted(&self) {
        let mut g = self.lock();
        g.agg.reset_evicted();
        let epoch = g.epoch + 1;
        g.epoch = epoch;
        self.store_snapshot(g.agg.freeze(epoch));
    }

    fn publish_locked(&self, g: &mut Inner, now: Instant) {
        let epoch = g.epoch + 1;
        g.epoch = epoch;
        g.throttle.published(now);
        metrics::gauge!("chat_retained_messages", g.agg.len() as f64);
        self.store_snapshot(g.agg.freeze(epoch));
    }

    fn store_snapshot(&self, next: FeedSnapshot) {
        let epoch = next.epoch;
        self.snap.store(Arc::new(next));
        self.epoch_tx.send_replace(epoch);
        metrics::counter!("chat_published_total", 1u64);
    }
}

/// Handle for readers to access the current snapshot and subscribe to swaps.
#[derive(Clone)]
pub struct FeedHandle {
    snap: Arc<ArcSwap<FeedSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl FeedHandle {
    pub fn current(&self) -> Arc<FeedSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }
    pub fn messages(&self) -> Vec<ChatMessage> { self.current().messages.clone() }
    pub fn evicted_count(&self) -> u64 { self.current().evicted }
    pub fn diagnostics(&self) -> String { self.current().diagnostics.clone() }
}

fn interval(every: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Spawn the aggregation loop: every `every`, drain the buffer into the store.
/// Exits when `stop` flips (or its sender goes away) or the run is halted.
pub fn spawn_aggregator(
    rt: &Handle,
    store: Arc<FeedStore>,
    buffer: Arc<IngestBuffer>,
    run: RunToken,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    rt.spawn(async move {
        let mut ticker = interval(every);
        let mut passes = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if *stop.borrow() || !store.is_live(run) { break; }
                    let batch = buffer.drain_all();
                    match store.aggregate(run, batch, Instant::now()) {
                        Pass::Halted => break,
                        Pass::Applied { accepted, trimmed, expired, published } => {
                            passes += 1;
                            if accepted > 0 {
                                debug!(accepted, trimmed, expired, published, "aggregation pass");
                            }
                        }
                    }
                }
            }
        }
        info!(passes, "aggregation loop stopped");
    })
}

/// Spawn the reaper: every `every`, evict messages older than `max_age`.
pub fn spawn_reaper(
    rt: &Handle,
    store: Arc<FeedStore>,
    run: RunToken,
    every: Duration,
    max_age: chrono::Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    rt.spawn(async move {
        let mut ticker = interval(every);
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if *stop.borrow() { break; }
                    let cutoff = cutoff_for(max_age);
                    match store.reap(run, cutoff) {
                        None => break,
                        Some(0) => {}
                        Some(removed) => debug!(removed, cutoff = %cutoff, "reaped stale messages"),
                    }
                }
            }
        }
        info!("reaper loop stopped");
    })
}

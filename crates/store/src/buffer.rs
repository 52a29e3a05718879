//! Bounded intake between producers and the aggregation pass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chatfeed_core::ChatMessage;
use tracing::trace;

/// FIFO with fixed capacity that sheds the oldest pending message when full.
///
/// `offer` never blocks beyond the short critical section; `drain_all` hands
/// every pending message out exactly once, in offer order.
pub struct IngestBuffer {
    queue: Mutex<VecDeque<ChatMessage>>,
    cap: usize,
    dropped: AtomicU64,
}

impl IngestBuffer {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self { queue: Mutex::new(VecDeque::with_capacity(cap)), cap, dropped: AtomicU64::new(0) }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ChatMessage>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.lock().len() }
    pub fn is_empty(&self) -> bool { self.lock().is_empty() }

    /// Messages shed on overflow since construction. Not part of the
    /// published eviction count.
    pub fn dropped(&self) -> u64 { self.dropped.load(Ordering::Relaxed) }

    /// Admit `msg`. Returns `true` when an older pending message was shed to
    /// make room.
    pub fn offer(&self, msg: ChatMessage) -> bool {
        let mut q = self.lock();
        let mut shed = false;
        if q.len() >= self.cap {
            if let Some(old) = q.pop_front() {
                shed = true;
                trace!(id = old.id, "ingest buffer full; dropping oldest");
            }
        }
        q.push_back(msg);
        drop(q);
        if shed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("chat_ingest_dropped_total", 1u64);
        }
        shed
    }

    /// Remove and return everything pending, oldest first.
    pub fn drain_all(&self) -> Vec<ChatMessage> {
        let mut q = self.lock();
        q.drain(..).collect()
    }
}

//! Capped fold of accepted messages into the retained list.

use std::collections::VecDeque;

use chatfeed_core::{diagnostics_text, ChatMessage, FeedSnapshot};
use chrono::{DateTime, Utc};

/// Keeps the newest `cap` messages in arrival order and counts every message
/// it has to let go of (cap trims and age reaps alike).
pub struct Aggregator {
    retained: VecDeque<ChatMessage>,
    cap: usize,
    evicted: u64,
}

impl Aggregator {
    pub fn with_cap(cap: usize) -> Self {
        Self { retained: VecDeque::new(), cap: cap.max(1), evicted: 0 }
    }

    pub fn cap(&self) -> usize { self.cap }
    pub fn len(&self) -> usize { self.retained.len() }
    pub fn is_empty(&self) -> bool { self.retained.is_empty() }
    pub fn evicted(&self) -> u64 { self.evicted }

    /// Append a batch in arrival order, then trim oldest-first down to the cap.
    /// Returns the number trimmed.
    pub fn fold(&mut self, batch: Vec<ChatMessage>) -> usize {
        self.retained.extend(batch);
        let overflow = self.retained.len().saturating_sub(self.cap);
        if overflow > 0 {
            self.retained.drain(..overflow);
            self.evicted = self.evicted.saturating_add(overflow as u64);
        }
        overflow
    }

    /// Like [`fold`](Self::fold), but incoming messages created before
    /// `cutoff` are counted as evicted instead of retained.
    /// Returns `(trimmed, expired)`.
    pub fn fold_fresh(&mut self, batch: Vec<ChatMessage>, cutoff: DateTime<Utc>) -> (usize, usize) {
        let before = batch.len();
        let fresh: Vec<_> = batch.into_iter().filter(|m| !m.is_older_than(cutoff)).collect();
        let expired = before - fresh.len();
        self.evicted = self.evicted.saturating_add(expired as u64);
        (self.fold(fresh), expired)
    }

    /// Drop every message created before `cutoff`. Returns the number removed.
    pub fn reap(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.retained.len();
        self.retained.retain(|m| !m.is_older_than(cutoff));
        let removed = before - self.retained.len();
        self.evicted = self.evicted.saturating_add(removed as u64);
        removed
    }

    pub fn reset_evicted(&mut self) {
        self.evicted = 0;
    }

    pub fn freeze(&self, epoch: u64) -> FeedSnapshot {
        FeedSnapshot {
            epoch,
            messages: self.retained.iter().cloned().collect(),
            evicted: self.evicted,
            diagnostics: diagnostics_text(self.retained.len(), self.cap),
        }
    }
}

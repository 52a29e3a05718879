use std::time::Duration;

use tokio::time::Instant;

/// Publish gate: at most one publish per `every`, and only when something
/// changed since the last one. Later passes supersede earlier ones, so only
/// the newest state is ever pushed.
#[derive(Debug)]
pub struct PublishThrottle {
    every: Duration,
    last: Option<Instant>,
    pending: bool,
}

impl PublishThrottle {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None, pending: false }
    }

    pub fn mark(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool { self.pending }

    pub fn ready(&self, now: Instant) -> bool {
        self.pending && self.last.map_or(true, |t| now.saturating_duration_since(t) >= self.every)
    }

    pub fn published(&mut self, now: Instant) {
        self.pending = false;
        self.last = Some(now);
    }
}

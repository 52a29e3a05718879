//! Chatfeed core types: messages, the published view and pipeline configuration.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod config;

pub use config::{ConfigError, FeedConfig};

/// Stable per-instance identity used as a list key.
pub type MessageId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> MessageId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// One chat line. Never mutated after construction.
///
/// Two messages with identical author/body are still distinct: identity is the
/// `id`, not the content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_timestamp(author, body, Utc::now())
    }

    pub fn with_timestamp(author: impl Into<String>, body: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self { id: next_id(), author: author.into(), body: body.into(), created_at }
    }

    pub fn display_text(&self) -> String {
        format!("{}: {}", self.author, self.body)
    }

    /// True when the message was created strictly before `cutoff`.
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}

/// Published view handed to readers. Immutable once frozen; the list and the
/// eviction counter always come from the same locked state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FeedSnapshot {
    /// Bumped on every publish.
    pub epoch: u64,
    /// Retained messages, newest last.
    pub messages: Vec<ChatMessage>,
    /// Cumulative cap + age evictions since the last reset.
    pub evicted: u64,
    pub diagnostics: String,
}

impl FeedSnapshot {
    pub fn len(&self) -> usize { self.messages.len() }
    pub fn is_empty(&self) -> bool { self.messages.is_empty() }

    /// Last `n` messages (or all of them when fewer are retained).
    pub fn tail(&self, n: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }
}

/// `"Memory: <N> displayed, cap: <CAP>"`
pub fn diagnostics_text(displayed: usize, cap: usize) -> String {
    format!("Memory: {} displayed, cap: {}", displayed, cap)
}

/// Extended variant that also reports the ingestion backlog.
pub fn diagnostics_text_buffered(displayed: usize, buffered: usize, cap: usize) -> String {
    format!("Memory: {} displayed, {} buffered, cap: {}", displayed, buffered, cap)
}

pub mod prelude {
    pub use super::{ChatMessage, ConfigError, FeedConfig, FeedSnapshot, MessageId};
}

#![forbid(unsafe_code)]

use std::time::Duration;

use chatfeed_api::source::SAMPLE_USERNAMES;
use chatfeed_api::{ChatFeedApi, InProcFeed};
use chatfeed_core::{ChatMessage, FeedConfig};
use tokio::runtime::Handle;
use tokio::time::sleep;

fn fast_config() -> FeedConfig {
    FeedConfig {
        max_messages: 10_000,
        generator_every: Duration::from_millis(10),
        aggregate_every: Duration::from_millis(15),
        publish_every: Duration::from_millis(75),
        cleanup_every: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Generator effectively idle after its first tick.
fn quiet_config() -> FeedConfig {
    FeedConfig { generator_every: Duration::from_secs(3600), ..fast_config() }
}

fn synthetic(snap: &chatfeed_core::FeedSnapshot) -> usize {
    snap.messages.iter().filter(|m| SAMPLE_USERNAMES.contains(&m.author.as_str())).count()
}

#[test]
fn invalid_config_is_rejected() {
    let cfg = FeedConfig { max_messages: 0, ..Default::default() };
    assert!(InProcFeed::new(cfg).is_err());
}

#[tokio::test(start_paused = true)]
async fn starts_stopped_and_empty() {
    let feed = InProcFeed::new(fast_config()).unwrap();
    assert!(!feed.is_running());
    let snap = feed.snapshot();
    assert!(snap.is_empty());
    assert_eq!(snap.evicted, 0);
    assert_eq!(snap.diagnostics, "Memory: 0 displayed, cap: 10000");
    assert_eq!(feed.memory_info(), "Memory: 0 displayed, 0 buffered, cap: 10000");
}

#[tokio::test(start_paused = true)]
async fn generates_messages_when_started() {
    let feed = InProcFeed::new(fast_config()).unwrap();
    assert!(feed.start(&Handle::current()));
    sleep(Duration::from_secs(1)).await;
    let snap = feed.snapshot();
    assert!(synthetic(&snap) > 50, "got {}", synthetic(&snap));
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn user_message_appears_within_one_publish_window() {
    let feed = InProcFeed::new(quiet_config()).unwrap();
    feed.start(&Handle::current());
    sleep(Duration::from_millis(200)).await;

    assert!(feed.send_user_message_as("hello", "Alice"));
    sleep(Duration::from_millis(15 + 75 + 5)).await;
    let snap = feed.snapshot();
    let last = snap.messages.last().unwrap();
    assert_eq!(last.author, "Alice");
    assert_eq!(last.body, "hello");
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn default_author_and_trimming() {
    let feed = InProcFeed::new(quiet_config()).unwrap();
    feed.start(&Handle::current());
    assert!(feed.send_user_message("  hi there  "));
    sleep(Duration::from_millis(200)).await;
    let snap = feed.snapshot();
    let mine: Vec<_> = snap.messages.iter().filter(|m| m.author == "You").collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].body, "hi there");
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn blank_user_messages_are_ignored() {
    let feed = InProcFeed::new(quiet_config()).unwrap();
    feed.start(&Handle::current());
    assert!(!feed.send_user_message(""));
    assert!(!feed.send_user_message("   "));
    sleep(Duration::from_millis(300)).await;
    let snap = feed.snapshot();
    assert!(snap.messages.iter().all(|m| m.author != "You"));
    assert_eq!(snap.evicted, 0);
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn list_stays_capped_and_evictions_are_counted() {
    let cfg = FeedConfig { max_messages: 20, generator_every: Duration::from_millis(2), ..fast_config() };
    let feed = InProcFeed::new(cfg).unwrap();
    feed.start(&Handle::current());
    let mut epochs = feed.subscribe();
    for _ in 0..20 {
        if epochs.changed().await.is_err() { break; }
        assert!(feed.snapshot().len() <= 20);
    }
    sleep(Duration::from_secs(1)).await;
    let snap = feed.snapshot();
    assert_eq!(snap.len(), 20);
    assert!(snap.evicted >= 300, "evicted {}", snap.evicted);
    assert_eq!(snap.diagnostics, "Memory: 20 displayed, cap: 20");
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ingest_overflow_is_not_counted_as_eviction() {
    let cfg = FeedConfig { queue_cap: 3, ..quiet_config() };
    let feed = InProcFeed::new(cfg).unwrap();
    feed.start(&Handle::current());
    sleep(Duration::from_millis(1)).await;

    for i in 0..10 {
        feed.submit(ChatMessage::new("Alice", i.to_string()));
    }
    sleep(Duration::from_millis(200)).await;
    let snap = feed.snapshot();
    let alice: Vec<_> = snap.messages.iter().filter(|m| m.author == "Alice").map(|m| m.body.as_str()).collect();
    assert_eq!(alice, vec!["7", "8", "9"]);
    assert_eq!(snap.evicted, 0);
    assert_eq!(feed.buffered(), 0);
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reaper_evicts_stale_messages() {
    let feed = InProcFeed::new(quiet_config()).unwrap();
    feed.start(&Handle::current());
    let now = chrono::Utc::now();
    feed.submit(ChatMessage::with_timestamp("Ghost", "from the past", now - chrono::Duration::minutes(11)));
    feed.submit(ChatMessage::with_timestamp("Alice", "recent", now));
    sleep(Duration::from_millis(200)).await;
    let snap = feed.snapshot();
    assert!(snap.messages.iter().all(|m| m.author != "Ghost"));
    assert!(snap.messages.iter().any(|m| m.author == "Alice"));
    assert_eq!(snap.evicted, 1);
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reset_zeroes_count_in_any_state() {
    let cfg = FeedConfig { max_messages: 5, ..fast_config() };
    let feed = InProcFeed::new(cfg).unwrap();
    feed.start(&Handle::current());
    sleep(Duration::from_millis(500)).await;
    assert!(feed.snapshot().evicted > 0);
    feed.reset_evicted_count();
    assert_eq!(feed.snapshot().evicted, 0);

    sleep(Duration::from_millis(300)).await;
    assert!(feed.snapshot().evicted > 0, "counting resumes after reset");

    feed.stop();
    feed.reset_evicted_count();
    assert_eq!(feed.snapshot().evicted, 0);
}

#[tokio::test(start_paused = true)]
async fn stop_freezes_published_state_and_start_resumes() {
    let feed = InProcFeed::new(fast_config()).unwrap();
    feed.start(&Handle::current());
    sleep(Duration::from_millis(500)).await;
    assert!(feed.stop());
    assert!(!feed.stop());
    assert!(!feed.is_running());

    let frozen = feed.snapshot();
    sleep(Duration::from_secs(5)).await;
    let later = feed.snapshot();
    assert_eq!(later.epoch, frozen.epoch);
    assert_eq!(later.messages, frozen.messages);
    assert_eq!(later.evicted, frozen.evicted);

    // User input while stopped waits in the buffer
    assert!(feed.send_user_message("queued"));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(feed.snapshot().epoch, frozen.epoch);

    assert!(feed.start(&Handle::current()));
    sleep(Duration::from_millis(500)).await;
    let resumed = feed.snapshot();
    assert!(resumed.epoch > frozen.epoch);
    assert!(resumed.len() > frozen.len());
    assert!(resumed.messages.iter().any(|m| m.body == "queued"));
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn double_start_keeps_a_single_set_of_loops() {
    let feed = InProcFeed::new(fast_config()).unwrap();
    assert!(feed.start(&Handle::current()));
    assert!(!feed.start(&Handle::current()));
    sleep(Duration::from_millis(995)).await;
    let snap = feed.snapshot();
    // One generator at 10 ms yields ~100 messages per second; two would yield ~200.
    let n = synthetic(&snap) + feed.buffered();
    assert!((85..=110).contains(&n), "generated {}", n);
    feed.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_joins_all_loops() {
    let feed = InProcFeed::new(fast_config()).unwrap();
    feed.start(&Handle::current());
    sleep(Duration::from_millis(100)).await;
    tokio::time::timeout(Duration::from_millis(50), feed.shutdown()).await.unwrap();
    assert!(!feed.is_running());
    // Restart after shutdown works too
    assert!(feed.start(&Handle::current()));
    feed.shutdown().await;
}

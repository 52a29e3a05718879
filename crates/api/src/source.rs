//! Message sources: the synthetic chat generator and user submissions.

use std::sync::Arc;
use std::time::Duration;

use chatfeed_core::ChatMessage;
use chatfeed_store::IngestBuffer;
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

/// Author used when a user submission does not name one.
pub const DEFAULT_AUTHOR: &str = "You";

pub const SAMPLE_USERNAMES: &[&str] = &[
    "PixelPenguin", "CodeMaster42", "KotlinQueen", "JetpackJake",
    "AndroidDev", "ComposeKing", "FlutterFan", "SwiftDev",
    "ReactRider", "VueVoyager", "AngularAce", "TypeScriptTitan",
    "PythonPro", "JavaJedi", "CSharpChamp", "GoGuru",
    "RustRacer", "DartDev", "KotlinKnight", "SwiftSage",
];

pub const SAMPLE_TEXTS: &[&str] = &[
    "Hello!", "GG!", "This is amazing", "LOL", "No way!", "Clip that!",
    "PogChamp", "Kappa", "MonkaS", "FeelsGoodMan", "PepeHands",
    "What a play!", "Insane!", "Unbelievable!", "Wow!", "Nice!",
    "Let's go!", "EZ Clap", "PogU", "Actually insane",
    "This stream is fire", "Quality content", "Love this game",
    "Subscribed!", "Donated!", "Followed!", "Raid incoming!",
    "ModCheck", "Ban this guy", "Timeout", "Welcome everyone!",
    "First time here", "Long time viewer", "New to the community",
    "Thanks for the raid!", "Good vibes only", "Positive chat",
    "Respect the streamer", "Be kind", "Spread love", "Wholesome",
];

/// One message with author and text drawn uniformly from the sample pools.
pub fn random_message<R: Rng + ?Sized>(rng: &mut R) -> ChatMessage {
    let author = SAMPLE_USERNAMES.choose(rng).copied().unwrap_or(DEFAULT_AUTHOR);
    let body = SAMPLE_TEXTS.choose(rng).copied().unwrap_or("");
    ChatMessage::new(author, body)
}

/// Build a user message from raw input. Blank input yields `None`.
pub fn user_message(text: &str, author: &str) -> Option<ChatMessage> {
    let body = text.trim();
    if body.is_empty() {
        return None;
    }
    Some(ChatMessage::new(author, body))
}

/// Offer one random message to `buffer` every `every` until `stop` flips.
pub(crate) fn spawn_generator(
    rt: &Handle,
    buffer: Arc<IngestBuffer>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    rt.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut produced = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => break,
                _ = ticker.tick() => {
                    if *stop.borrow() { break; }
                    let msg = random_message(&mut rand::rng());
                    buffer.offer(msg);
                    metrics::counter!("chat_generated_total", 1u64);
                    produced += 1;
                }
            }
        }
        info!(produced, "generator loop stopped");
    })
}

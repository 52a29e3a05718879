use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chatfeed_api::{ChatFeedApi, InProcFeed, DEFAULT_AUTHOR};
use chatfeed_core::{ChatMessage, FeedConfig, FeedSnapshot};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::signal;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "chatfeedctl", version, about = "Simulated live chat feed")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Number of newest messages printed per refresh
    #[arg(long = "tail", global = true, default_value_t = 10)]
    tail: usize,

    /// Refresh period in milliseconds
    #[arg(long = "refresh-ms", global = true, default_value_t = 1000)]
    refresh_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the synthetic feed and print its tail
    Run {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long = "secs")]
        secs: Option<u64>,
    },
    /// Run the feed and forward stdin lines as chat messages
    /// (`/pause` toggles the feed, `/reset` zeroes the eviction count, `/quit` exits)
    Chat {
        /// Author for submitted lines
        #[arg(long = "author", default_value = DEFAULT_AUTHOR)]
        author: String,
    },
}

fn init_tracing() {
    let env = std::env::var("CHATFEED_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CHATFEED_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CHATFEED_METRICS_ADDR; expected host:port");
        }
    }
}

#[derive(serde::Serialize)]
struct Frame<'a> {
    epoch: u64,
    evicted: u64,
    diagnostics: &'a str,
    memory: String,
    tail: &'a [ChatMessage],
}

fn render(feed: &InProcFeed, snap: &FeedSnapshot, cli: &Cli) -> Result<()> {
    let tail = snap.tail(cli.tail);
    match cli.output {
        Output::Human => {
            println!("--- {} | evicted: {} | epoch {}", feed.memory_info(), snap.evicted, snap.epoch);
            for m in tail {
                println!("[{}] {}", m.created_at.format("%H:%M:%S"), m.display_text());
            }
        }
        Output::Json => {
            let frame = Frame { epoch: snap.epoch, evicted: snap.evicted, diagnostics: &snap.diagnostics, memory: feed.memory_info(), tail };
            println!("{}", serde_json::to_string(&frame)?);
        }
    }
    Ok(())
}

fn handle_line(feed: &InProcFeed, line: &str, author: &str) -> bool {
    match line.trim() {
        "/quit" => return false,
        "/reset" => {
            feed.reset_evicted_count();
            info!("eviction count reset");
        }
        "/pause" => {
            if feed.is_running() {
                feed.stop();
                info!("feed paused");
            } else {
                feed.start(&Handle::current());
                info!("feed resumed");
            }
        }
        _ => {
            feed.send_user_message_as(line, author);
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let config = FeedConfig::from_env();
    info!(?config, "config loaded");
    let feed = InProcFeed::new(config)?;
    feed.start(&Handle::current());

    let mut refresh = tokio::time::interval(Duration::from_millis(cli.refresh_ms.max(10)));
    match &cli.command {
        Commands::Run { secs } => {
            let deadline = secs.map(|s| Instant::now() + Duration::from_secs(s));
            loop {
                tokio::select! {
                    _ = refresh.tick() => {
                        render(&feed, &feed.snapshot(), &cli)?;
                        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                            info!("run duration elapsed");
                            break;
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; stopping feed");
                        break;
                    }
                }
            }
        }
        Commands::Chat { author } => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    _ = refresh.tick() => render(&feed, &feed.snapshot(), &cli)?,
                    line = lines.next_line() => {
                        match line? {
                            Some(l) => {
                                if !handle_line(&feed, &l, author) { break; }
                            }
                            None => {
                                info!("stdin closed");
                                break;
                            }
                        }
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; stopping feed");
                        break;
                    }
                }
            }
        }
    }

    feed.shutdown().await;
    render(&feed, &feed.snapshot(), &cli)?;
    Ok(())
}

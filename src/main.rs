use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use scrollback::backend::MemoryBackend;
use scrollback::core::types::{InitialAnchor, MessageId};
use scrollback::{
    ConversationId, Direction, FeedConfig, FeedError, FeedEvent, PaginationController,
    ProximityTrigger, VisibleRange, WindowSnapshot,
};

#[derive(Parser)]
#[command(name = "scrollback")]
#[command(author, version, about = "Scrollback - windowed chat history feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config directory)
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines chat log through a feed, scrolling to both ends
    Replay {
        /// Chat log, one message per line
        #[arg(short, long)]
        log: PathBuf,

        /// Channel name (default: the server status buffer)
        #[arg(short, long)]
        channel: Option<String>,

        /// Open the view around this message id instead of the latest messages
        #[arg(long)]
        around: Option<u64>,

        /// Number of rows on screen
        #[arg(long, default_value = "20")]
        viewport: usize,

        /// Stop after this many pages per direction
        #[arg(long, default_value = "1000")]
        max_pages: usize,
    },

    /// Print the effective configuration
    Config,
}

/// One line of replay output
#[derive(Debug, Serialize)]
struct ReplayStep {
    step: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<Direction>,
    added: usize,
    trimmed: usize,
    len: usize,
    oldest: Option<MessageId>,
    newest: Option<MessageId>,
    has_older: bool,
    has_newer: bool,
}

impl ReplayStep {
    fn new(
        step: &'static str,
        direction: Option<Direction>,
        added: usize,
        trimmed: usize,
        snapshot: &WindowSnapshot,
    ) -> Self {
        Self {
            step,
            direction,
            added,
            trimmed,
            len: snapshot.len(),
            oldest: snapshot.messages.first().map(|m| m.id),
            newest: snapshot.messages.last().map(|m| m.id),
            has_older: snapshot.has_older,
            has_newer: snapshot.has_newer,
        }
    }

    fn print(&self) -> Result<()> {
        println!("{}", serde_json::to_string(self)?);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "scrollback=debug"
    } else {
        "scrollback=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(cli.config_path.as_deref())?;

    match cli.command {
        Commands::Replay {
            log,
            channel,
            around,
            viewport,
            max_pages,
        } => {
            replay(config, &log, channel, around, viewport, max_pages).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<FeedConfig> {
    let config = match path {
        Some(path) => FeedConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => FeedConfig::load()?,
    };
    Ok(config)
}

async fn replay(
    config: FeedConfig,
    log: &Path,
    channel: Option<String>,
    around: Option<u64>,
    viewport: usize,
    max_pages: usize,
) -> Result<()> {
    let conversation = match channel {
        Some(name) => ConversationId::channel(Uuid::nil(), name),
        None => ConversationId::server_status(Uuid::nil()),
    };

    let backend = Arc::new(MemoryBackend::new());
    let total = backend.load_jsonl(conversation.clone(), log)?;
    tracing::info!(%conversation, total, "Replaying chat log");

    let anchor = match around {
        Some(id) => {
            let message = backend
                .find(&conversation, MessageId(id))
                .with_context(|| format!("Message {} not found in {}", id, log.display()))?;
            InitialAnchor::Around(message.key())
        }
        None => InitialAnchor::Latest,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller =
        PaginationController::new(conversation, backend, config.pagination.clone(), tx);
    let trigger = ProximityTrigger::from_config(&config.trigger);
    let viewport = viewport.max(1);

    let snapshot = controller.load_initial(anchor).await?;
    ReplayStep::new("initial", None, snapshot.len(), 0, &snapshot).print()?;

    for direction in [Direction::Older, Direction::Newer] {
        scroll_to_end(&controller, &trigger, direction, viewport, max_pages).await?;
    }

    controller.close();
    while let Ok(event) = rx.try_recv() {
        if let FeedEvent::Anomaly { error, .. } = &event {
            tracing::warn!(%error, "Feed anomaly during replay");
        }
    }

    ReplayStep::new("done", None, 0, 0, &controller.snapshot()).print()
}

/// Keep the viewport pinned to one edge and page until the trigger stops firing
async fn scroll_to_end(
    controller: &PaginationController,
    trigger: &ProximityTrigger,
    direction: Direction,
    viewport: usize,
    max_pages: usize,
) -> Result<()> {
    for _ in 0..max_pages {
        let len = controller.len();
        let range = match direction {
            Direction::Older => VisibleRange::new(0, viewport.min(len).saturating_sub(1)),
            Direction::Newer => {
                VisibleRange::new(len.saturating_sub(viewport), len.saturating_sub(1))
            }
        };

        let wanted = trigger.evaluate(range, len);
        let near = match direction {
            Direction::Older => wanted.older,
            Direction::Newer => wanted.newer,
        };
        if !near {
            break;
        }

        match controller.load_more(direction).await {
            Ok(outcome) => {
                ReplayStep::new(
                    "page",
                    Some(direction),
                    outcome.added,
                    outcome.trimmed,
                    &outcome.snapshot,
                )
                .print()?;
            }
            Err(FeedError::Exhausted(_)) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

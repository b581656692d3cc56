//! helpdeskd - support chatbot chain daemon

use anyhow::{Context, Result};
use clap::Parser;
use helpdesk_shared::VERSION;
use helpdeskd::config::Config;
use helpdeskd::flags::{FileFlags, FlagSource, StaticFlags};
use helpdeskd::metrics::ChainMetrics;
use helpdeskd::openai::OpenAiClient;
use helpdeskd::orchestrator::ChainDeps;
use helpdeskd::server::{self, AppState};
use helpdeskd::spans::LiveSpans;
use helpdeskd::store::{SessionStore, TrackerStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "helpdeskd", version, about = "Support chatbot chain daemon")]
struct Args {
    /// Config file (defaults to /etc/helpdesk/config.toml when present)
    #[arg(long, env = "HELPDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("helpdeskd v{} starting", VERSION);

    let config = Config::load(args.config.as_deref())?;
    let metrics = ChainMetrics::new().context("registering metrics")?;

    let flags: Arc<dyn FlagSource> = match &config.flags.path {
        Some(path) => {
            info!("Flags from {}", path.display());
            Arc::new(FileFlags::new(path))
        }
        None => {
            info!("Flags: built-in defaults");
            Arc::new(StaticFlags::new())
        }
    };

    let client = OpenAiClient::from_config(&config.openai).context("creating model client")?;
    let spans = LiveSpans::new(client, Arc::clone(&flags), metrics.clone(), &config.openai);

    let deps = ChainDeps::new(
        Arc::new(spans),
        SessionStore::new(config.sessions.capacity, config.sessions.ttl())
            .with_max_turns(config.sessions.max_turns),
        TrackerStore::new(config.trackers.capacity, config.trackers.ttl()),
        metrics,
    );
    server::spawn_pruner(deps.clone(), PRUNE_INTERVAL);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    server::run(AppState::new(deps, flags), &bind, config.server.max_body_bytes).await
}

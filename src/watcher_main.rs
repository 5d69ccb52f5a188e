//! TRC-20 transfer watcher binary
//!
//! Polls TronGrid for Transfer events of one token contract and reports
//! every transfer touching a watched address.

use anyhow::{Context, Result};
use clap::Parser;
use gridwatch::config::{
    load_watchlist, parse_addresses, WatcherConfig, DEFAULT_MAX_RETRIES, USDT_CONTRACT,
};
use gridwatch::feed::{FeedClient, DEFAULT_API_BASE_URL};
use gridwatch::{JsonLinesSink, LogSink, NotificationSink, OrderBy, TronAddress, WatchMode, Watcher};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// TRC-20 transfer watcher
#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watch TRC-20 Transfer events for a set of Tron addresses")]
struct Args {
    /// TronGrid API key
    #[arg(long, env = "TRONGRID_API_KEY", hide_env_values = true)]
    api_key: String,

    /// TronGrid base URL
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    /// Base58 address of the token contract
    #[arg(short, long, default_value = USDT_CONTRACT)]
    contract: String,

    /// Path to watchlist file (one base58 address per line)
    #[arg(short, long)]
    watchlist: Option<PathBuf>,

    /// Address to watch, may be repeated
    #[arg(short, long = "address")]
    addresses: Vec<String>,

    /// Which side of a transfer must be watched
    #[arg(short, long, value_enum, default_value_t = WatchMode::To)]
    mode: WatchMode,

    /// Width of each polling window in seconds
    #[arg(long, default_value_t = 60)]
    lookback_secs: u64,

    /// Pause between windows in seconds
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Events per page (1..=200)
    #[arg(long, default_value_t = 200)]
    limit: u32,

    /// Also process events the provider has not confirmed yet
    #[arg(long)]
    include_unconfirmed: bool,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Sort order by block timestamp
    #[arg(long, value_enum, default_value_t = OrderBy::Descending)]
    order: OrderBy,

    /// Retries for a page that failed with a transient error
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Append notifications as JSON lines to this file instead of logging them
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(WatcherConfig, Option<PathBuf>)> {
        let mut watch_addresses = match &self.watchlist {
            Some(path) => load_watchlist(path).context("Failed to load watchlist")?,
            None => Vec::new(),
        };
        for addr in parse_addresses(&self.addresses)? {
            if !watch_addresses.contains(&addr) {
                watch_addresses.push(addr);
            }
        }

        let contract: TronAddress = self
            .contract
            .parse()
            .with_context(|| format!("Invalid contract address: {}", self.contract))?;

        let mut config = WatcherConfig::new(self.api_key, watch_addresses)?;
        config.api_base_url = self.api_url;
        config.contract = contract;
        config.mode = self.mode;
        config.lookback_window = Duration::from_secs(self.lookback_secs);
        config.poll_interval = Duration::from_secs(self.poll_interval_secs);
        config.limit = self.limit;
        config.only_confirmed = !self.include_unconfirmed;
        config.request_timeout = Duration::from_secs(self.timeout_secs);
        config.order_by = self.order;
        config.max_retries = self.max_retries;
        config.validate()?;

        Ok((config, self.output))
    }
}

async fn run_watcher<S: NotificationSink>(
    config: WatcherConfig,
    sink: S,
    shutdown: CancellationToken,
) -> Result<()> {
    let feed = FeedClient::new(&config.api_base_url, &config.api_key, config.request_timeout)?;
    let mut watcher = Watcher::new(config, feed, sink)?;
    watcher.run(shutdown).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (config, output) = Args::parse().into_config()?;

    info!("Starting TronGrid event watcher");
    info!("Contract: {}", config.contract);
    for addr in &config.watch_addresses {
        info!("Watching address: base58={}, hex={}", addr, addr.to_evm_hex());
    }

    // Cancel the loop on Ctrl+C
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
        });
    }

    match output {
        Some(path) => {
            let sink = JsonLinesSink::append_to(&path)?;
            info!("Writing notifications to {:?}", path);
            run_watcher(config, sink, shutdown).await
        }
        None => run_watcher(config, LogSink, shutdown).await,
    }
    .context("Watcher error")?;

    info!("Watcher stopped");
    Ok(())
}

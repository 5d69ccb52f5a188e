//! CLI implementation for tronctl
//!
//! Address conversion and one-off queries against the event feed.
//! All commands output pretty JSON.

use crate::address::{base58_to_hex20, hex20_string, parse_hex20, TronAddress};
use crate::config::USDT_CONTRACT;
use crate::feed::{EventFeed, FeedClient, DEFAULT_API_BASE_URL};
use crate::paginate::collect_window;
use crate::types::{EventQuery, OrderBy, Window, MAX_PAGE_LIMIT};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::time::Duration;

/// Tron address and event feed tool
#[derive(Parser)]
#[command(name = "tronctl")]
#[command(about = "Tron address conversion and TronGrid event queries")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a base58 Tron address into its 20-byte hex form
    Decode {
        /// Base58check address (T...)
        address: String,
    },
    /// Encode a hex address as a base58 Tron address
    Encode {
        /// 20-byte hex, with or without 0x, or 21-byte hex starting with 41
        hex: String,
    },
    /// Fetch Transfer events of a contract
    Events {
        /// TronGrid API key
        #[arg(long, env = "TRONGRID_API_KEY", hide_env_values = true)]
        api_key: String,

        /// TronGrid base URL
        #[arg(long, default_value = DEFAULT_API_BASE_URL)]
        api_url: String,

        /// Base58 contract address
        #[arg(long, default_value = USDT_CONTRACT)]
        contract: String,

        /// Events per page (1..=200)
        #[arg(long, default_value_t = 20)]
        limit: u32,

        /// Inclusive lower block timestamp in ms
        #[arg(long)]
        min_ts: Option<i64>,

        /// Inclusive upper block timestamp in ms
        #[arg(long)]
        max_ts: Option<i64>,

        /// Sort order by block timestamp
        #[arg(long, value_enum)]
        order: Option<OrderBy>,

        /// Fingerprint returned by a previous page
        #[arg(long)]
        cursor: Option<String>,

        /// Also return events the provider has not confirmed yet
        #[arg(long)]
        include_unconfirmed: bool,

        /// Follow fingerprints until the window is exhausted
        #[arg(long, requires_all = ["min_ts", "max_ts"], conflicts_with = "cursor")]
        all_pages: bool,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

/// JSON description of a base58 address.
fn decode_json(address: &str) -> Result<Value> {
    let hex20 = base58_to_hex20(address)
        .with_context(|| format!("Failed to decode address {}", address.trim()))?;
    Ok(json!({
        "base58": address.trim(),
        "hex20": hex20_string(&hex20),
        "evm_hex": TronAddress::from_hex20(hex20).to_evm_hex(),
    }))
}

/// JSON description of a hex address.
fn encode_json(hex: &str) -> Result<Value> {
    let hex20 = parse_hex20(hex)?;
    let addr = TronAddress::from_hex20(hex20);
    Ok(json!({
        "base58": addr.to_base58(),
        "hex20": hex20_string(&hex20),
        "evm_hex": addr.to_evm_hex(),
    }))
}

#[allow(clippy::too_many_arguments)]
async fn events_json(
    feed: &FeedClient,
    contract: String,
    limit: u32,
    min_ts: Option<i64>,
    max_ts: Option<i64>,
    order: Option<OrderBy>,
    cursor: Option<String>,
    include_unconfirmed: bool,
    all_pages: bool,
) -> Result<Value> {
    contract
        .parse::<TronAddress>()
        .with_context(|| format!("Invalid contract address {}", contract))?;
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        anyhow::bail!("limit must be within 1..={}, got {}", MAX_PAGE_LIMIT, limit);
    }
    if let (Some(min), Some(max)) = (min_ts, max_ts) {
        if min > max {
            anyhow::bail!("min_ts ({}) is after max_ts ({})", min, max);
        }
    }

    let mut query = EventQuery::transfers(contract);
    query.limit = limit;
    query.only_confirmed = !include_unconfirmed;
    query.order_by = order;
    query.min_block_timestamp = min_ts.unwrap_or(0);
    query.max_block_timestamp = max_ts.unwrap_or(0);
    query.cursor = cursor;

    if all_pages {
        let window = Window::new(query.min_block_timestamp, query.max_block_timestamp);
        let events = collect_window(feed, query, window)
            .await
            .context("Failed to fetch events")?;
        return Ok(json!({
            "count": events.len(),
            "events": events,
        }));
    }

    let page = feed.fetch_page(&query).await.context("Failed to fetch events")?;
    Ok(json!({
        "count": page.events.len(),
        "next_cursor": page.meta.fingerprint,
        "events": page.events,
    }))
}

/// Run the CLI command and print JSON output.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Decode { address } => decode_json(&address)?,
        Commands::Encode { hex } => encode_json(&hex)?,
        Commands::Events {
            api_key,
            api_url,
            contract,
            limit,
            min_ts,
            max_ts,
            order,
            cursor,
            include_unconfirmed,
            all_pages,
            timeout_secs,
        } => {
            let feed = FeedClient::new(&api_url, &api_key, Duration::from_secs(timeout_secs))?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(events_json(
                &feed,
                contract,
                limit,
                min_ts,
                max_ts,
                order,
                cursor,
                include_unconfirmed,
                all_pages,
            ))?
        }
    };

    // Pretty print JSON
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

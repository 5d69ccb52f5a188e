//! Watcher configuration and watchlist loading
//!
//! The watchlist file holds one base58 Tron address per line.

use crate::address::TronAddress;
use crate::dispatch::WatchMode;
use crate::feed::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::types::{EventQuery, OrderBy, MAX_PAGE_LIMIT};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// TRC-20 USDT on Tron mainnet.
pub const USDT_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

pub const DEFAULT_LOOKBACK_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Everything the watcher needs to run.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub api_base_url: String,
    pub api_key: String,
    /// Token contract whose Transfer events are watched
    pub contract: TronAddress,
    pub watch_addresses: Vec<TronAddress>,
    pub mode: WatchMode,
    /// Width of each polling window, ending at the current wall time
    pub lookback_window: Duration,
    /// Sleep between windows
    pub poll_interval: Duration,
    /// Page size, 1..=200
    pub limit: u32,
    pub only_confirmed: bool,
    pub request_timeout: Duration,
    pub order_by: OrderBy,
    /// Extra attempts for a page that failed with a transient error
    pub max_retries: u32,
}

impl WatcherConfig {
    /// Config with defaults for everything but the key and the watch list.
    pub fn new(api_key: impl Into<String>, watch_addresses: Vec<TronAddress>) -> Result<Self> {
        let contract = USDT_CONTRACT
            .parse::<TronAddress>()
            .context("Invalid default contract address")?;
        Ok(Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            contract,
            watch_addresses,
            mode: WatchMode::default(),
            lookback_window: DEFAULT_LOOKBACK_WINDOW,
            poll_interval: DEFAULT_POLL_INTERVAL,
            limit: MAX_PAGE_LIMIT,
            only_confirmed: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            order_by: OrderBy::Descending,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Reject configurations the watcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            anyhow::bail!("API key is empty, set a valid TronGrid API key");
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            anyhow::bail!("limit must be within 1..={}, got {}", MAX_PAGE_LIMIT, self.limit);
        }
        if self.lookback_window.is_zero() {
            anyhow::bail!("lookback window must be positive");
        }
        if self.poll_interval.is_zero() {
            anyhow::bail!("poll interval must be positive");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request timeout must be positive");
        }
        if self.watch_addresses.is_empty() && self.mode != WatchMode::All {
            anyhow::bail!(
                "no addresses to watch (mode {} needs at least one)",
                self.mode.as_str()
            );
        }
        Ok(())
    }

    /// Base query for every page; the paginator fills in window and cursor.
    pub fn base_query(&self) -> EventQuery {
        let mut query = EventQuery::transfers(self.contract.to_base58());
        query.only_confirmed = self.only_confirmed;
        query.limit = self.limit;
        query.order_by = Some(self.order_by);
        query
    }
}

/// Parse base58 addresses given inline, naming the first bad one.
pub fn parse_addresses<S: AsRef<str>>(raw: &[S]) -> Result<Vec<TronAddress>> {
    raw.iter()
        .map(|s| {
            let s = s.as_ref().trim();
            s.parse::<TronAddress>()
                .with_context(|| format!("Invalid watch address: {}", s))
        })
        .collect()
}

/// Load a watchlist from a file.
///
/// Each line holds one base58 Tron address. Empty lines and lines
/// starting with '#' are ignored; text after whitespace is treated as a
/// label and dropped.
///
/// # Example file format:
/// ```text
/// TNPdqto8HiuMzoG7Vv9wyyYhWzCojLeHAF  Binance-Cold 4
/// # This is a comment
/// ```
pub fn load_watchlist(path: &Path) -> Result<Vec<TronAddress>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read watchlist file: {:?}", path))?;

    let mut addresses = Vec::new();
    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let token = line.split_whitespace().next().unwrap_or(line);
        let addr: TronAddress = token
            .parse()
            .with_context(|| format!("Invalid address on line {}: {}", line_num + 1, token))?;

        if !addresses.contains(&addr) {
            addresses.push(addr);
        }
    }

    if addresses.is_empty() {
        anyhow::bail!("Watchlist is empty (no valid addresses found)");
    }

    Ok(addresses)
}

//! TronGrid event feed types
//!
//! Type definitions for the contract-events endpoint: the query sent,
//! the page returned and the events inside it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Name of the TRC-20 transfer event.
pub const TRANSFER_EVENT: &str = "Transfer";

/// Upper bound the provider accepts for `limit`.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Separator between transaction id and event index in idempotency keys.
pub const IDEMPOTENCY_KEY_SEPARATOR: &str = "#";

/// A single contract event as returned by the feed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub block_number: i64,

    /// Block timestamp in milliseconds since the epoch
    #[serde(rename = "block_timestamp")]
    pub block_timestamp_ms: i64,

    /// Position of the log within its transaction
    pub event_index: i64,

    pub event_name: String,

    /// Transaction hash, lowercase hex without `0x`
    pub transaction_id: String,

    /// Only present (and true) for events the provider has not confirmed yet
    #[serde(rename = "_unconfirmed", default)]
    pub unconfirmed: bool,

    /// Decoded event arguments; for Transfer the keys of interest are
    /// `from`, `to` and `value`. Unknown keys are ignored.
    #[serde(default)]
    pub result: Map<String, Value>,
}

impl Event {
    /// Stable key identifying this log position: `transaction_id#event_index`.
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}{}{}",
            self.transaction_id, IDEMPOTENCY_KEY_SEPARATOR, self.event_index
        )
    }

    /// String-valued entry of the result map.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result.get(key).and_then(Value::as_str)
    }
}

/// Pagination metadata of a page.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PageMeta {
    /// Cursor for the next page, absent or empty on the last page
    #[serde(default)]
    pub fingerprint: String,

    #[serde(default)]
    pub page_size: i64,
}

/// One page of the contract-events endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Page {
    #[serde(rename = "data", default)]
    pub events: Vec<Event>,

    #[serde(default)]
    pub meta: PageMeta,

    #[serde(default)]
    pub success: bool,

    /// Error message sent alongside `success: false`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Page {
    pub fn next_cursor(&self) -> &str {
        &self.meta.fingerprint
    }
}

/// Sort order applied by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OrderBy {
    #[value(name = "asc")]
    Ascending,
    #[default]
    #[value(name = "desc")]
    Descending,
}

impl OrderBy {
    pub const fn as_str(self) -> &'static str {
        match self {
            OrderBy::Ascending => "block_timestamp,asc",
            OrderBy::Descending => "block_timestamp,desc",
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive block-timestamp interval in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub min_ts_ms: i64,
    pub max_ts_ms: i64,
}

impl Window {
    /// Create a window, swapping the bounds if they arrive reversed.
    pub fn new(min_ts_ms: i64, max_ts_ms: i64) -> Self {
        if min_ts_ms <= max_ts_ms {
            Self { min_ts_ms, max_ts_ms }
        } else {
            Self {
                min_ts_ms: max_ts_ms,
                max_ts_ms: min_ts_ms,
            }
        }
    }

    /// The window `[now - lookback, now]`.
    pub fn ending_at(now_ms: i64, lookback: Duration) -> Self {
        let lookback_ms = i64::try_from(lookback.as_millis()).unwrap_or(i64::MAX);
        Self::new(now_ms.saturating_sub(lookback_ms).max(0), now_ms)
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        self.min_ts_ms <= ts_ms && ts_ms <= self.max_ts_ms
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min_ts_ms, self.max_ts_ms)
    }
}

/// Full filter for one request against the contract-events endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// Base58 contract address, substituted into the URL path
    pub contract: String,
    pub event_name: String,
    pub only_confirmed: bool,
    pub limit: u32,
    /// Inclusive lower bound in ms, omitted when 0
    pub min_block_timestamp: i64,
    /// Inclusive upper bound in ms, omitted when 0
    pub max_block_timestamp: i64,
    pub order_by: Option<OrderBy>,
    /// Cursor from the previous page, omitted when `None`
    pub cursor: Option<String>,
}

impl EventQuery {
    /// Transfer-event query with provider defaults and no time bounds.
    pub fn transfers(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            event_name: TRANSFER_EVENT.to_string(),
            only_confirmed: true,
            limit: MAX_PAGE_LIMIT,
            min_block_timestamp: 0,
            max_block_timestamp: 0,
            order_by: None,
            cursor: None,
        }
    }

    /// Restrict the query to a time window.
    pub fn with_window(mut self, window: Window) -> Self {
        self.min_block_timestamp = window.min_ts_ms;
        self.max_block_timestamp = window.max_ts_ms;
        self
    }

    /// Query-string pairs in the form the provider expects.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("event_name", self.event_name.clone()),
            ("limit", self.limit.to_string()),
            ("only_confirmed", self.only_confirmed.to_string()),
        ];
        if let Some(cursor) = self.cursor.as_deref().filter(|c| !c.is_empty()) {
            pairs.push(("fingerprint", cursor.to_string()));
        }
        if self.min_block_timestamp > 0 {
            pairs.push(("min_block_timestamp", self.min_block_timestamp.to_string()));
        }
        if self.max_block_timestamp > 0 {
            pairs.push(("max_block_timestamp", self.max_block_timestamp.to_string()));
        }
        if let Some(order_by) = self.order_by {
            pairs.push(("order_by", order_by.as_str().to_string()));
        }
        pairs
    }
}

//! Transfer matching and dispatch
//!
//! Decides whether a feed event concerns a watched address and, if so,
//! hands a `Notification` to the sink. Each notification carries the
//! event's idempotency key; keys already delivered in this run are not
//! sent again.

use crate::address::{base58_to_hex20, hex20_string, parse_hex20, AddressError, TronAddress};
use crate::cache::SeenKeys;
use crate::sink::NotificationSink;
use crate::types::{Event, TRANSFER_EVENT};
use alloy_primitives::{Address, U256};
use serde::{Serialize, Serializer};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Which side of a transfer has to be watched for it to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WatchMode {
    /// Incoming transfers only
    #[default]
    #[value(name = "watch_to")]
    To,
    /// Outgoing transfers only
    #[value(name = "watch_from")]
    From,
    /// Either side
    #[value(name = "both")]
    Both,
    /// Every transfer of the contract, regardless of the watch set
    #[value(name = "all")]
    All,
}

impl WatchMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            WatchMode::To => "watch_to",
            WatchMode::From => "watch_from",
            WatchMode::Both => "both",
            WatchMode::All => "all",
        }
    }
}

/// Direction of a matched transfer relative to the watch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Deposit,
    Withdrawal,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Withdrawal => "WITHDRAWAL",
        }
    }
}

/// Immutable set of watched 20-byte addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    addresses: HashSet<Address>,
}

impl WatchSet {
    pub fn new(addresses: impl IntoIterator<Item = TronAddress>) -> Self {
        Self {
            addresses: addresses.into_iter().map(|a| a.hex20()).collect(),
        }
    }

    /// Build the set from base58 strings, failing on the first bad one.
    pub fn from_base58<'a>(addresses: impl IntoIterator<Item = &'a str>) -> Result<Self, AddressError> {
        let addresses = addresses
            .into_iter()
            .map(base58_to_hex20)
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { addresses })
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.addresses.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

fn serialize_hex20<S: Serializer>(addr: &Address, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex20_string(addr))
}

fn serialize_decimal<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

/// Record handed to the sink for every matched transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub direction: Direction,
    #[serde(serialize_with = "serialize_hex20")]
    pub from: Address,
    #[serde(serialize_with = "serialize_hex20")]
    pub to: Address,
    /// Raw token amount, no decimals applied
    #[serde(serialize_with = "serialize_decimal")]
    pub value: U256,
    pub tx_id: String,
    pub event_index: i64,
    pub block_number: i64,
    pub block_timestamp_ms: i64,
    pub confirmed: bool,
    /// `tx_id#event_index`
    pub key: String,
}

/// Why an event produced no notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Skip {
    /// Not a Transfer event
    OtherEvent,
    /// Neither side matches the watch set under the current mode
    NotWatched,
    /// A required result field is missing or unparseable
    Malformed(&'static str),
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Emitted,
    Duplicate,
    Unmatched,
    Skipped,
    SinkFailed,
}

/// Parse a base-10 token amount.
fn parse_value(raw: &str) -> Option<U256> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    U256::from_str_radix(raw, 10).ok()
}

fn result_address(event: &Event, field: &'static str) -> Result<Address, Skip> {
    event
        .result_str(field)
        .and_then(|raw| parse_hex20(raw).ok())
        .ok_or(Skip::Malformed(field))
}

/// Matches events against the watch set and forwards hits to the sink.
pub struct Dispatcher<S> {
    watch_set: WatchSet,
    mode: WatchMode,
    seen: SeenKeys,
    sink: S,
}

impl<S: NotificationSink> Dispatcher<S> {
    pub fn new(watch_set: WatchSet, mode: WatchMode, sink: S) -> Self {
        Self {
            watch_set,
            mode,
            seen: SeenKeys::new(),
            sink,
        }
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    /// Number of keys currently remembered.
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Build the notification for `event`, or say why there is none.
    pub fn classify(&self, event: &Event) -> Result<Notification, Skip> {
        if event.event_name != TRANSFER_EVENT {
            return Err(Skip::OtherEvent);
        }

        let to = result_address(event, "to")?;
        let from = result_address(event, "from")?;

        let to_watched = self.watch_set.contains(&to);
        let from_watched = self.watch_set.contains(&from);
        let direction = match self.mode {
            WatchMode::To if to_watched => Direction::Deposit,
            WatchMode::From if from_watched => Direction::Withdrawal,
            WatchMode::Both if to_watched => Direction::Deposit,
            WatchMode::Both if from_watched => Direction::Withdrawal,
            WatchMode::All if from_watched && !to_watched => Direction::Withdrawal,
            WatchMode::All => Direction::Deposit,
            _ => return Err(Skip::NotWatched),
        };

        let value = event
            .result_str("value")
            .and_then(parse_value)
            .ok_or(Skip::Malformed("value"))?;

        Ok(Notification {
            direction,
            from,
            to,
            value,
            tx_id: event.transaction_id.clone(),
            event_index: event.event_index,
            block_number: event.block_number,
            block_timestamp_ms: event.block_timestamp_ms,
            confirmed: !event.unconfirmed,
            key: event.idempotency_key(),
        })
    }

    /// Classify `event` and deliver it unless its key was already delivered.
    pub fn dispatch(&mut self, event: &Event) -> DispatchOutcome {
        let notification = match self.classify(event) {
            Ok(n) => n,
            Err(Skip::Malformed(field)) => {
                warn!(
                    tx = %event.transaction_id,
                    event_index = event.event_index,
                    field,
                    "Skipping event with malformed result"
                );
                return DispatchOutcome::Skipped;
            }
            Err(Skip::OtherEvent) => return DispatchOutcome::Skipped,
            Err(Skip::NotWatched) => return DispatchOutcome::Unmatched,
        };

        if self.seen.contains(&notification.key) {
            debug!(key = %notification.key, "Already delivered");
            return DispatchOutcome::Duplicate;
        }

        if let Err(e) = self.sink.emit(&notification) {
            warn!(key = %notification.key, error = %e, "Sink rejected notification");
            return DispatchOutcome::SinkFailed;
        }

        self.seen
            .insert(notification.key, notification.block_timestamp_ms);
        DispatchOutcome::Emitted
    }

    /// Forget delivered keys that no window starting at `min_ts_ms` can return.
    pub fn prune_seen(&mut self, min_ts_ms: i64) -> usize {
        self.seen.prune_before(min_ts_ms)
    }
}

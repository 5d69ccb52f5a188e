//! Gridwatch - TRC-20 transfer watcher for Tron
//!
//! Polls the TronGrid contract-events feed in overlapping time windows,
//! matches Transfer events against a set of watched addresses and hands
//! each hit to a sink exactly once per run, keyed by `txid#event_index`.

pub mod address;
pub mod cli;
pub mod config;
pub mod types;

// Watcher modules
pub mod cache;
pub mod dispatch;
pub mod feed;
pub mod paginate;
pub mod sink;
pub mod watcher;

// Re-export the main types for convenience
pub use address::{base58_to_hex20, hex20_to_base58, AddressError, TronAddress};
pub use config::WatcherConfig;
pub use dispatch::{Direction, Notification, WatchMode, WatchSet};
pub use feed::{EventFeed, FeedClient, FeedError};
pub use sink::{JsonLinesSink, LogSink, NotificationSink};
pub use types::{Event, EventQuery, OrderBy, Page, Window};
pub use watcher::Watcher;

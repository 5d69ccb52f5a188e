//! In-memory record of emitted idempotency keys
//!
//! Consecutive windows overlap, so the same event is usually returned
//! several times. Remembering which keys were already handed to the sink
//! avoids repeated sink calls within one process run. The sink itself
//! still has to drop duplicates: this set is lost on restart.
//!
//! Each key is stored with its block timestamp. Once a window's lower
//! bound moves past that timestamp no later window can return the event
//! again, so the entry can be pruned.

use std::collections::HashMap;

/// Keys already delivered downstream, with the block timestamp of their event.
#[derive(Debug, Default)]
pub struct SeenKeys {
    keys: HashMap<String, i64>,
}

impl SeenKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Record a delivered key. Returns false if it was already present.
    pub fn insert(&mut self, key: String, block_timestamp_ms: i64) -> bool {
        self.keys.insert(key, block_timestamp_ms).is_none()
    }

    /// Forget keys whose events are older than `min_ts_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn prune_before(&mut self, min_ts_ms: i64) -> usize {
        let before = self.keys.len();
        self.keys.retain(|_, ts| *ts >= min_ts_ms);
        before - self.keys.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

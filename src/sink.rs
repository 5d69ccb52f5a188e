//! Downstream notification sinks
//!
//! The watcher hands every matched transfer to a sink exactly once per
//! process run. Sinks must still treat `Notification::key` as an
//! idempotency key: overlapping windows across restarts can replay events.

use crate::address::hex20_to_base58;
use crate::dispatch::Notification;
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Receiver of matched transfer notifications.
pub trait NotificationSink {
    /// Deliver one notification. An error leaves the key unrecorded so a
    /// later overlapping window delivers it again.
    fn emit(&mut self, notification: &Notification) -> Result<()>;
}

impl<S: NotificationSink + ?Sized> NotificationSink for Box<S> {
    fn emit(&mut self, notification: &Notification) -> Result<()> {
        (**self).emit(notification)
    }
}

/// Logs every notification through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn emit(&mut self, n: &Notification) -> Result<()> {
        info!(
            direction = n.direction.as_str(),
            from = %hex20_to_base58(n.from),
            to = %hex20_to_base58(n.to),
            value = %n.value,
            tx = %n.tx_id,
            event_index = n.event_index,
            confirmed = n.confirmed,
            key = %n.key,
            "Transfer hit"
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<File> {
    /// Open `path` for appending, creating it if needed.
    pub fn append_to(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open output file {:?}", path))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> NotificationSink for JsonLinesSink<W> {
    fn emit(&mut self, notification: &Notification) -> Result<()> {
        serde_json::to_writer(&mut self.writer, notification)
            .context("Failed to serialize notification")?;
        self.writer
            .write_all(b"\n")
            .context("Failed to write notification")?;
        self.writer.flush().context("Failed to flush notification")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dispatch::Direction;
    use alloy_primitives::{Address, U256};
    use std::io::{BufRead, BufReader};
    use std::sync::{Arc, Mutex};

    /// Sink collecting notifications into a shared vector.
    #[derive(Clone, Default)]
    pub(crate) struct MemorySink {
        pub(crate) seen: Arc<Mutex<Vec<Notification>>>,
        pub(crate) fail: Arc<Mutex<bool>>,
    }

    impl MemorySink {
        pub(crate) fn keys(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|n| n.key.clone()).collect()
        }
    }

    impl NotificationSink for MemorySink {
        fn emit(&mut self, notification: &Notification) -> Result<()> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("sink unavailable");
            }
            self.seen.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn notification() -> Notification {
        Notification {
            direction: Direction::Deposit,
            from: Address::from([0x11; 20]),
            to: Address::from([0x22; 20]),
            value: U256::from(2_500_000u64),
            tx_id: "ab12".to_string(),
            event_index: 4,
            block_number: 66_000_000,
            block_timestamp_ms: 1_729_000_000_000,
            confirmed: true,
            key: "ab12#4".to_string(),
        }
    }

    #[test]
    fn test_json_lines_format() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&notification()).unwrap();
        sink.emit(&notification()).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["direction"], "DEPOSIT");
        assert_eq!(value["from"], "1111111111111111111111111111111111111111");
        assert_eq!(value["to"], "2222222222222222222222222222222222222222");
        assert_eq!(value["value"], "2500000");
        assert_eq!(value["key"], "ab12#4");
        assert_eq!(value["confirmed"], true);
    }

    #[test]
    fn test_json_lines_append_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.jsonl");

        JsonLinesSink::append_to(&path).unwrap().emit(&notification()).unwrap();
        JsonLinesSink::append_to(&path).unwrap().emit(&notification()).unwrap();

        let reader = BufReader::new(File::open(&path).unwrap());
        assert_eq!(reader.lines().count(), 2);
    }

    #[test]
    fn test_log_sink_accepts() {
        let mut sink: Box<dyn NotificationSink> = Box::new(LogSink);
        assert!(sink.emit(&notification()).is_ok());
    }
}

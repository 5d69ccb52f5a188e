//! Main watcher loop
//!
//! Each iteration opens a window `[now - lookback, now]`, pages through it
//! with the window frozen, dispatches every event, then sleeps for the
//! poll interval. Consecutive windows overlap; the dispatcher's key set
//! turns the overlap into at-most-once delivery.

use crate::config::WatcherConfig;
use crate::dispatch::{DispatchOutcome, Dispatcher, WatchSet};
use crate::feed::{EventFeed, FeedError};
use crate::paginate::Paginator;
use crate::sink::NotificationSink;
use crate::types::{Event, EventQuery, Window};
use anyhow::{Context, Result};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// First retry delay for a failed page.
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Counters for one completed window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub pages: u32,
    pub events: usize,
    pub emitted: usize,
    pub duplicates: usize,
    pub unmatched: usize,
    pub skipped: usize,
    pub sink_failures: usize,
    /// Remembered keys dropped after the window
    pub pruned: usize,
}

impl WindowStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Emitted => self.emitted += 1,
            DispatchOutcome::Duplicate => self.duplicates += 1,
            DispatchOutcome::Unmatched => self.unmatched += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::SinkFailed => self.sink_failures += 1,
        }
    }

    /// Events that concerned a watched address, delivered or not.
    pub fn matched(&self) -> usize {
        self.emitted + self.duplicates + self.sink_failures
    }
}

/// How a window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    Completed(WindowStats),
    /// Shutdown was requested while the window was in flight
    Cancelled,
}

/// Current wall time in milliseconds since the epoch.
fn now_ms() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("System clock is before the Unix epoch")?;
    i64::try_from(elapsed.as_millis()).context("System clock out of range")
}

/// Fetch the next page, retrying transient failures with exponential
/// backoff. Each delay is capped at `max_backoff`.
async fn next_page_with_retry<F: EventFeed>(
    paginator: &mut Paginator<'_, F>,
    max_retries: u32,
    max_backoff: Duration,
) -> Result<Option<Vec<Event>>, FeedError> {
    let mut attempt = 0;
    let mut backoff = INITIAL_BACKOFF.min(max_backoff);
    loop {
        match paginator.next_page().await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    page = paginator.pages() + 1,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Page fetch failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Polls the event feed and dispatches matching transfers.
pub struct Watcher<F, S> {
    config: WatcherConfig,
    query: EventQuery,
    feed: F,
    dispatcher: Dispatcher<S>,
}

impl<F: EventFeed, S: NotificationSink> Watcher<F, S> {
    /// Create a watcher. Fails if the configuration is unusable.
    pub fn new(config: WatcherConfig, feed: F, sink: S) -> Result<Self> {
        config.validate().context("Invalid watcher configuration")?;

        let watch_set = WatchSet::new(config.watch_addresses.iter().copied());
        let dispatcher = Dispatcher::new(watch_set, config.mode, sink);
        let query = config.base_query();

        Ok(Self {
            config,
            query,
            feed,
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Page through one frozen window and dispatch every event.
    ///
    /// A feed error that survives the retries abandons the window; events
    /// already dispatched stay delivered and the next overlapping window
    /// picks up the rest.
    pub async fn process_window(
        &mut self,
        window: Window,
        shutdown: &CancellationToken,
    ) -> Result<WindowOutcome, FeedError> {
        let mut paginator = Paginator::new(&self.feed, self.query.clone(), window);
        let mut stats = WindowStats::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(WindowOutcome::Cancelled),
                res = next_page_with_retry(
                    &mut paginator,
                    self.config.max_retries,
                    self.config.poll_interval,
                ) => res?,
            };
            let Some(events) = next else {
                break;
            };

            debug!(page = paginator.pages(), events = events.len(), "Processing page");
            stats.events += events.len();
            for event in &events {
                stats.record(self.dispatcher.dispatch(event));
            }
        }

        stats.pages = paginator.pages();
        stats.pruned = self.dispatcher.prune_seen(window.min_ts_ms);
        Ok(WindowOutcome::Completed(stats))
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            contract = %self.config.contract,
            watched = self.dispatcher.watch_set().len(),
            mode = self.config.mode.as_str(),
            lookback_secs = self.config.lookback_window.as_secs(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Starting watcher loop"
        );

        while !shutdown.is_cancelled() {
            let window = Window::ending_at(now_ms()?, self.config.lookback_window);
            debug!(window = %window, "Opening window");

            match self.process_window(window, &shutdown).await {
                Ok(WindowOutcome::Completed(stats)) => info!(
                    window = %window,
                    pages = stats.pages,
                    events = stats.events,
                    matched = stats.matched(),
                    emitted = stats.emitted,
                    duplicates = stats.duplicates,
                    unmatched = stats.unmatched,
                    skipped = stats.skipped,
                    sink_failures = stats.sink_failures,
                    pruned = stats.pruned,
                    "Completed window"
                ),
                Ok(WindowOutcome::Cancelled) => break,
                Err(e) => error!(window = %window, error = %e, "Abandoning window"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("Watcher loop stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TronAddress;
    use crate::dispatch::WatchMode;
    use crate::paginate::tests::{page, transfer, ScriptedFeed};
    use crate::sink::tests::MemorySink;
    use crate::types::Page;
    use reqwest::StatusCode;

    const WATCHED: &str = "0x88403ac26730e33164eeac403291b48f300b782f";
    const OTHER: &str = "0x1111111111111111111111111111111111111111";

    fn config() -> WatcherConfig {
        let watched: TronAddress = "TNPdqto8HiuMzoG7Vv9wyyYhWzCojLeHAF".parse().unwrap();
        let mut cfg = WatcherConfig::new("key", vec![watched]).unwrap();
        cfg.poll_interval = Duration::from_millis(10);
        cfg.max_retries = 2;
        cfg
    }

    fn watcher(feed: ScriptedFeed) -> (Watcher<ScriptedFeed, MemorySink>, MemorySink) {
        let sink = MemorySink::default();
        (Watcher::new(config(), feed, sink.clone()).unwrap(), sink)
    }

    fn completed(outcome: WindowOutcome) -> WindowStats {
        match outcome {
            WindowOutcome::Completed(stats) => stats,
            WindowOutcome::Cancelled => panic!("window was cancelled"),
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut cfg = config();
        cfg.api_key = String::new();
        assert!(Watcher::new(cfg, ScriptedFeed::default(), MemorySink::default()).is_err());
    }

    #[tokio::test]
    async fn test_single_page_window() {
        let ev1 = transfer("tx1", 0, 1_500, OTHER, OTHER);
        let ev2 = transfer("tx2", 7, 1_600, OTHER, WATCHED);
        let feed = ScriptedFeed::new(vec![Ok(page(vec![ev1, ev2.clone()], ""))]);
        let (mut w, sink) = watcher(feed);

        let stats = completed(
            w.process_window(Window::new(1_000, 2_000), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(stats.pages, 1);
        assert_eq!(stats.events, 2);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.matched(), 1);
        assert_eq!(sink.keys(), vec![format!("{}#{}", ev2.transaction_id, ev2.event_index)]);
    }

    #[tokio::test]
    async fn test_multi_page_window() {
        let first = (0..200)
            .map(|i| transfer(&format!("a{i}"), i, 1_900, OTHER, WATCHED))
            .collect();
        let second = (0..50)
            .map(|i| transfer(&format!("b{i}"), i, 1_100, OTHER, WATCHED))
            .collect();
        let feed = ScriptedFeed::new(vec![Ok(page(first, "c")), Ok(page(second, ""))]);
        let (mut w, sink) = watcher(feed);

        let stats = completed(
            w.process_window(Window::new(1_000, 2_000), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.emitted, 250);
        assert_eq!(stats.duplicates, 0);

        let mut keys = sink.keys();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 250);
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let (mut w, sink) = watcher(ScriptedFeed::new(vec![Ok(page(Vec::new(), ""))]));
        let stats = completed(
            w.process_window(Window::new(1_000, 2_000), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(stats.events, 0);
        assert!(sink.keys().is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_windows_emit_once() {
        let t = 1_700_000_060_000;
        let shared = transfer("shared", 2, t - 30_000, OTHER, WATCHED);
        let later = transfer("later", 0, t + 2_000, OTHER, WATCHED);
        let feed = ScriptedFeed::new(vec![
            Ok(page(vec![shared.clone()], "")),
            Ok(page(vec![later, shared], "")),
        ]);
        let (mut w, sink) = watcher(feed);
        let token = CancellationToken::new();

        let w1 = Window::ending_at(t, Duration::from_secs(60));
        let w2 = Window::ending_at(t + 5_000, Duration::from_secs(60));
        assert!(w2.min_ts_ms < w1.max_ts_ms);

        completed(w.process_window(w1, &token).await.unwrap());
        let stats = completed(w.process_window(w2, &token).await.unwrap());
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.matched(), 2);
        assert_eq!(sink.keys(), vec!["shared#2".to_string(), "later#0".to_string()]);
    }

    #[tokio::test]
    async fn test_seen_keys_pruned_behind_window() {
        let feed = ScriptedFeed::new(vec![
            Ok(page(vec![transfer("old", 0, 1_100, OTHER, WATCHED)], "")),
            Ok(page(Vec::new(), "")),
        ]);
        let (mut w, _sink) = watcher(feed);
        let token = CancellationToken::new();

        completed(w.process_window(Window::new(1_000, 2_000), &token).await.unwrap());
        assert_eq!(w.dispatcher().seen_len(), 1);

        let stats = completed(w.process_window(Window::new(1_500, 2_500), &token).await.unwrap());
        assert_eq!(stats.pruned, 1);
        assert_eq!(w.dispatcher().seen_len(), 0);
    }

    #[tokio::test]
    async fn test_transient_error_retried() {
        let feed = ScriptedFeed::new(vec![
            Err(FeedError::Http {
                status: StatusCode::BAD_GATEWAY,
                body: "upstream".to_string(),
            }),
            Ok(page(vec![transfer("tx", 0, 1_500, OTHER, WATCHED)], "")),
        ]);
        let (mut w, sink) = watcher(feed);

        let stats = completed(
            w.process_window(Window::new(1_000, 2_000), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.keys().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_abandons_window() {
        let busy = || {
            Err(FeedError::Http {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            })
        };
        let feed = ScriptedFeed::new(vec![busy(), busy(), busy()]);
        let (mut w, _sink) = watcher(feed);

        let err = w
            .process_window(Window::new(1_000, 2_000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        // One attempt plus two retries
        assert_eq!(w.feed.calls(), 3);
    }

    #[tokio::test]
    async fn test_provider_error_not_retried() {
        let feed = ScriptedFeed::new(vec![Err(FeedError::Provider("bad".into()))]);
        let (mut w, _sink) = watcher(feed);

        let err = w
            .process_window(Window::new(1_000, 2_000), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::Provider(_)));
        assert_eq!(w.feed.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_window() {
        let (mut w, sink) = watcher(ScriptedFeed::new(vec![Ok(page(
            vec![transfer("tx", 0, 1_500, OTHER, WATCHED)],
            "",
        ))]));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = w.process_window(Window::new(1_000, 2_000), &token).await.unwrap();
        assert_eq!(outcome, WindowOutcome::Cancelled);
        assert!(sink.keys().is_empty());
        assert_eq!(w.dispatcher().seen_len(), 0);
    }

    /// Feed whose pages never arrive.
    struct StalledFeed;

    impl EventFeed for StalledFeed {
        async fn fetch_page(&self, _query: &EventQuery) -> Result<Page, FeedError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(FeedError::Provider("stalled".into()))
        }
    }

    fn cancel_after(token: &CancellationToken, delay: Duration) {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
        });
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_page() {
        let sink = MemorySink::default();
        let mut w = Watcher::new(config(), StalledFeed, sink.clone()).unwrap();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(100));

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            w.process_window(Window::new(1_000, 2_000), &token),
        )
        .await
        .expect("window should stop on cancellation")
        .unwrap();
        assert_eq!(outcome, WindowOutcome::Cancelled);
        assert!(sink.keys().is_empty());
        assert_eq!(w.dispatcher().seen_len(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_while_page_in_flight() {
        let sink = MemorySink::default();
        let mut w = Watcher::new(config(), StalledFeed, sink.clone()).unwrap();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(100));

        tokio::time::timeout(Duration::from_secs(5), w.run(token))
            .await
            .expect("run should stop on cancellation")
            .unwrap();
        assert!(sink.keys().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_retry_backoff() {
        let mut cfg = config();
        // Backoff becomes 250ms once the cap is above it
        cfg.poll_interval = Duration::from_secs(30);
        cfg.max_retries = 5;
        let feed = ScriptedFeed::new(vec![
            Err(FeedError::Http {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            }),
            Ok(page(vec![transfer("tx", 0, 1_500, OTHER, WATCHED)], "")),
        ]);
        let sink = MemorySink::default();
        let mut w = Watcher::new(cfg, feed, sink.clone()).unwrap();
        let token = CancellationToken::new();
        cancel_after(&token, Duration::from_millis(100));

        let outcome = w
            .process_window(Window::new(1_000, 2_000), &token)
            .await
            .unwrap();
        assert_eq!(outcome, WindowOutcome::Cancelled);
        assert_eq!(w.feed.calls(), 1);
        assert!(sink.keys().is_empty());
        assert_eq!(w.dispatcher().seen_len(), 0);
    }

    #[tokio::test]
    async fn test_run_survives_failed_window_and_stops_on_cancel() {
        let ts = now_ms().unwrap() - 1_000;
        let feed = ScriptedFeed::new(vec![Err(FeedError::Provider("hiccup".into()))]);
        feed.push(Ok(page(vec![transfer("tx", 5, ts, OTHER, WATCHED)], "")));
        let (mut w, sink) = watcher(feed);

        let token = CancellationToken::new();
        let stopper = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });

        w.run(token).await.unwrap();
        assert_eq!(sink.keys(), vec!["tx#5".to_string()]);
        assert!(w.feed.calls() >= 2);
    }

    #[tokio::test]
    async fn test_run_returns_immediately_when_cancelled() {
        let (mut w, _sink) = watcher(ScriptedFeed::default());
        let token = CancellationToken::new();
        token.cancel();
        w.run(token).await.unwrap();
        assert_eq!(w.feed.calls(), 0);
    }

    #[tokio::test]
    async fn test_watch_all_mode() {
        let mut cfg = config();
        cfg.mode = WatchMode::All;
        cfg.watch_addresses.clear();
        let sink = MemorySink::default();
        let feed = ScriptedFeed::new(vec![Ok(page(
            vec![transfer("tx", 0, 1_500, OTHER, OTHER)],
            "",
        ))]);
        let mut w = Watcher::new(cfg, feed, sink.clone()).unwrap();

        completed(
            w.process_window(Window::new(1_000, 2_000), &CancellationToken::new())
                .await
                .unwrap(),
        );
        assert_eq!(sink.keys().len(), 1);
    }
}

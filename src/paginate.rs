//! Cursor-driven pagination over one frozen time window
//!
//! The provider's fingerprint is only valid for the exact filter that
//! produced it, so every page of a run reuses the same query and only the
//! cursor changes.

use crate::feed::{EventFeed, FeedError};
use crate::types::{Event, EventQuery, Window};
use tracing::{debug, warn};

/// Walks the pages of one window in server order.
pub struct Paginator<'a, F> {
    feed: &'a F,
    query: EventQuery,
    window: Window,
    pages: u32,
    done: bool,
}

impl<'a, F: EventFeed> Paginator<'a, F> {
    /// Start a run. The query's time bounds are replaced by `window`
    /// and its cursor is reset to the first page.
    pub fn new(feed: &'a F, query: EventQuery, window: Window) -> Self {
        let mut query = query.with_window(window);
        query.cursor = None;
        Self {
            feed,
            query,
            window,
            pages: 0,
            done: false,
        }
    }

    /// Number of pages fetched so far.
    pub fn pages(&self) -> u32 {
        self.pages
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the window is exhausted. A failed fetch
    /// leaves the cursor untouched, so calling again repeats the same
    /// request.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Event>>, FeedError> {
        if self.done {
            return Ok(None);
        }

        let page = self.feed.fetch_page(&self.query).await?;
        self.pages += 1;

        let next_cursor = page.next_cursor().to_string();
        if next_cursor.is_empty() || page.events.is_empty() {
            debug!(
                page = self.pages,
                events = page.events.len(),
                "Reached end of window"
            );
            self.done = true;
        } else {
            self.query.cursor = Some(next_cursor);
        }

        let window = self.window;
        let events = page
            .events
            .into_iter()
            .filter(|event| {
                let inside = window.contains(event.block_timestamp_ms);
                if !inside {
                    warn!(
                        tx = %event.transaction_id,
                        block_timestamp = event.block_timestamp_ms,
                        window = %window,
                        "Provider returned event outside the requested window, dropping"
                    );
                }
                inside
            })
            .collect();

        Ok(Some(events))
    }
}

/// Drain every page of `window` into one vector, in server order.
pub async fn collect_window<F: EventFeed>(
    feed: &F,
    query: EventQuery,
    window: Window,
) -> Result<Vec<Event>, FeedError> {
    let mut paginator = Paginator::new(feed, query, window);
    let mut events = Vec::new();
    while let Some(page) = paginator.next_page().await? {
        events.extend(page);
    }
    Ok(events)
}

//! Stream discovery for one log group
//!
//! Without a prefix the store can list streams most-recent-first, so listing
//! stops at the first page that lies entirely before the window. With a
//! prefix the store lists in name order, so discovery reads up to the cap,
//! sorts client-side and drops streams idle since before the window.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use logscope_store::{ListStreamsRequest, LogStore, StoreError};
use logscope_types::{FetchWindow, LogStream, duration_ms};

/// Slack for the store updating `last_event_timestamp` lazily
pub const DEFAULT_STALENESS_ALLOWANCE: Duration = Duration::from_secs(5 * 60);

/// Result of discovering streams in one log group
#[derive(Debug, Default)]
pub struct Discovery {
    /// Candidate streams, most recently written first
    pub streams: Vec<LogStream>,

    /// Set when listing stopped at the cap with streams left unlisted
    pub truncated: bool,

    /// Listing failure; `streams` is empty when set
    pub error: Option<StoreError>,
}

impl Discovery {
    fn failed(error: StoreError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Lists and time-filters candidate streams
#[derive(Clone)]
pub struct StreamDiscoverer {
    store: Arc<dyn LogStore>,
    staleness_allowance: Duration,
}

impl StreamDiscoverer {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            staleness_allowance: DEFAULT_STALENESS_ALLOWANCE,
        }
    }

    pub fn with_staleness_allowance(mut self, allowance: Duration) -> Self {
        self.staleness_allowance = allowance;
        self
    }

    /// Discover streams in `log_group` that may hold events inside `window`.
    ///
    /// Listing errors never propagate: the result is empty and carries the
    /// error for the caller to report.
    pub async fn discover(
        &self,
        log_group: &str,
        prefix: Option<&str>,
        window: FetchWindow,
        cap: usize,
    ) -> Discovery {
        let result = match prefix {
            None => self.discover_by_recency(log_group, window, cap).await,
            Some(prefix) => self.discover_by_prefix(log_group, prefix, window, cap).await,
        };

        match result {
            Ok(discovery) => {
                debug!(
                    log_group,
                    prefix = ?prefix,
                    streams = discovery.streams.len(),
                    truncated = discovery.truncated,
                    "discovered streams"
                );
                discovery
            }
            Err(e) => Discovery::failed(e),
        }
    }

    async fn discover_by_recency(
        &self,
        log_group: &str,
        window: FetchWindow,
        cap: usize,
    ) -> Result<Discovery, StoreError> {
        let threshold = window
            .start_time
            .saturating_sub(duration_ms(self.staleness_allowance));
        let mut request = ListStreamsRequest {
            log_group: log_group.to_string(),
            order_by_recency: true,
            ..Default::default()
        };
        let mut discovery = Discovery::default();

        loop {
            let page = self.store.list_streams(&request).await?;
            let page_len = page.streams.len();
            let mut active = page
                .streams
                .into_iter()
                .filter(|s| s.is_active_since(threshold))
                .peekable();

            // Ordered by recency: a page with nothing recent means nothing after it is either
            if page_len > 0 && active.peek().is_none() {
                break;
            }

            for stream in active {
                if discovery.streams.len() >= cap {
                    discovery.truncated = true;
                    break;
                }
                discovery.streams.push(stream);
            }

            match page.next_token {
                _ if discovery.truncated => break,
                Some(token) if discovery.streams.len() < cap => request.next_token = Some(token),
                Some(_) => {
                    // Cap reached exactly; more pages exist but were not listed
                    discovery.truncated = true;
                    break;
                }
                None => break,
            }
        }

        discovery.streams.sort_by(LogStream::cmp_most_recent_first);
        Ok(discovery)
    }

    async fn discover_by_prefix(
        &self,
        log_group: &str,
        prefix: &str,
        window: FetchWindow,
        cap: usize,
    ) -> Result<Discovery, StoreError> {
        let mut request = ListStreamsRequest {
            log_group: log_group.to_string(),
            prefix: Some(prefix.to_string()),
            ..Default::default()
        };
        let mut listed: Vec<LogStream> = Vec::new();
        let mut truncated = false;

        loop {
            let page = self.store.list_streams(&request).await?;
            let remaining = cap.saturating_sub(listed.len());
            if page.streams.len() > remaining {
                truncated = true;
            }
            listed.extend(page.streams.into_iter().take(remaining));

            match page.next_token {
                _ if truncated => break,
                Some(_) if listed.len() >= cap => {
                    truncated = true;
                    break;
                }
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }

        listed.sort_by(LogStream::cmp_most_recent_first);
        listed.retain(|s| s.is_active_since(window.start_time));

        Ok(Discovery {
            streams: listed,
            truncated,
            error: None,
        })
    }
}

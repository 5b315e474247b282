use std::sync::Arc;

use tracing::debug;

use logscope_store::{LogStore, QueryEventsRequest, StoreError, TermPattern};
use logscope_types::{FetchWindow, LogEvent};

/// Default cap on result pages read per stream
pub const DEFAULT_MAX_PAGES: usize = 10;

/// Events read from one stream
#[derive(Debug, Default)]
pub struct StreamEvents {
    pub stream_id: String,
    pub events: Vec<LogEvent>,

    /// Set when the page cap stopped reading before the stream was exhausted
    pub truncated: bool,
}

/// How a run's filter pattern is applied to stream queries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// Sent with every query
    pub server: Option<String>,

    /// Evaluated on returned events
    pub local: Option<TermPattern>,

    /// Set when a pattern was given that neither side can evaluate
    pub unevaluated: bool,
}

impl QueryFilter {
    /// Decide once per run where `pattern` is evaluated
    pub fn resolve(pattern: Option<&str>, server_side: bool) -> Self {
        match pattern {
            None => Self::default(),
            Some(pattern) if server_side => Self {
                server: Some(pattern.to_string()),
                ..Default::default()
            },
            Some(pattern) => {
                let local = TermPattern::parse(pattern);
                Self {
                    unevaluated: local.is_none(),
                    local,
                    ..Default::default()
                }
            }
        }
    }

    fn matches(&self, message: &str) -> bool {
        self.local.as_ref().is_none_or(|p| p.matches(message))
    }
}

/// Paginated, bounded event fetch for a single stream
#[derive(Clone)]
pub struct StreamFetcher {
    store: Arc<dyn LogStore>,
    max_pages: usize,
}

impl StreamFetcher {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self {
            store,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Fetch events of `stream_id` inside `window`.
    ///
    /// Events outside the window are dropped whatever the store returned.
    pub async fn fetch(
        &self,
        log_group: &str,
        stream_id: &str,
        window: FetchWindow,
        filter: &QueryFilter,
    ) -> Result<StreamEvents, StoreError> {
        let mut fetched = StreamEvents {
            stream_id: stream_id.to_string(),
            ..Default::default()
        };
        if window.is_empty() {
            return Ok(fetched);
        }

        let mut request = QueryEventsRequest {
            log_group: log_group.to_string(),
            stream_id: stream_id.to_string(),
            start_time: window.start_time,
            // The store's end bound is inclusive
            end_time: window.end_time - 1,
            filter_pattern: filter.server.clone(),
            limit: self.store.max_page_size(),
            next_token: None,
        };

        let mut pages = 0;
        loop {
            let page = self.store.query_events(&request).await?;
            pages += 1;

            fetched.events.extend(
                page.events
                    .into_iter()
                    .filter(|e| window.contains(e.timestamp))
                    .filter(|e| filter.matches(&e.message)),
            );

            match page.next_token {
                // Some stores hand back the request token once exhausted
                Some(token) if request.next_token.as_deref() == Some(token.as_str()) => break,
                Some(token) if pages < self.max_pages => request.next_token = Some(token),
                Some(_) => {
                    fetched.truncated = true;
                    break;
                }
                None => break,
            }
        }

        debug!(
            stream_id,
            pages,
            events = fetched.events.len(),
            truncated = fetched.truncated,
            "fetched stream"
        );
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logscope_store::MemoryStore;

    fn store_with_events(events: &[(i64, &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        store.add_stream_with_events(
            "g",
            "s",
            events.iter().map(|(ts, msg)| LogEvent::new(*ts, *msg, "s")).collect(),
        );
        store
    }

    #[tokio::test]
    async fn test_window_is_enforced() {
        let store = Arc::new(store_with_events(&[
            (99, "early"),
            (100, "in"),
            (199, "in"),
            (200, "late"),
        ]));
        let fetcher = StreamFetcher::new(store);

        let fetched = fetcher.fetch("g", "s", FetchWindow::new(100, 200), &QueryFilter::default()).await.unwrap();
        let timestamps: Vec<_> = fetched.events.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![100, 199]);
        assert!(!fetched.truncated);
    }

    #[tokio::test]
    async fn test_page_cap_sets_truncated() {
        let events: Vec<_> = (0..10i64).map(|i| (i, "x")).collect();
        let store = Arc::new(store_with_events(&events).with_event_page_size(3));
        let fetcher = StreamFetcher::new(store.clone()).with_max_pages(2);

        let fetched = fetcher.fetch("g", "s", FetchWindow::new(0, 100), &QueryFilter::default()).await.unwrap();
        assert_eq!(fetched.events.len(), 6);
        assert!(fetched.truncated);
        assert_eq!(store.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_reads_all_pages_under_cap() {
        let events: Vec<_> = (0..10i64).map(|i| (i, "x")).collect();
        let store = Arc::new(store_with_events(&events).with_event_page_size(3));
        let fetcher = StreamFetcher::new(store.clone());

        let fetched = fetcher.fetch("g", "s", FetchWindow::new(0, 100), &QueryFilter::default()).await.unwrap();
        assert_eq!(fetched.events.len(), 10);
        assert!(!fetched.truncated);
        assert_eq!(store.query_calls(), 4);
    }

    #[tokio::test]
    async fn test_pattern_is_applied_locally_without_server_filter() {
        let store = Arc::new(
            store_with_events(&[(1, "GET /health"), (2, "ERROR boom"), (3, "INFO ok")])
                .without_server_filter(),
        );
        let fetcher = StreamFetcher::new(store);
        let filter = QueryFilter::resolve(Some(r#"-"/health""#), false);

        let fetched = fetcher
            .fetch("g", "s", FetchWindow::new(0, 10), &filter)
            .await
            .unwrap();
        let messages: Vec<_> = fetched.events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["ERROR boom", "INFO ok"]);
    }

    #[test]
    fn test_filter_is_resolved_once_per_side() {
        let server = QueryFilter::resolve(Some("ERROR"), true);
        assert_eq!(server.server.as_deref(), Some("ERROR"));
        assert!(server.local.is_none());

        let local = QueryFilter::resolve(Some("ERROR"), false);
        assert!(local.server.is_none());
        assert!(local.local.is_some());
        assert!(!local.unevaluated);

        let structured = QueryFilter::resolve(Some(r#"{ $.level = "error" }"#), false);
        assert_eq!(structured.server, None);
        assert_eq!(structured.local, None);
        assert!(structured.unevaluated);

        assert_eq!(QueryFilter::resolve(None, false), QueryFilter::default());
    }

    #[tokio::test]
    async fn test_structured_pattern_without_server_filter_keeps_events() {
        let store = Arc::new(
            store_with_events(&[(1, "INFO a"), (2, "ERROR b")]).without_server_filter(),
        );
        let fetcher = StreamFetcher::new(store);
        let filter = QueryFilter::resolve(Some(r#"{ $.level = "error" }"#), false);

        let fetched = fetcher.fetch("g", "s", FetchWindow::new(0, 10), &filter).await.unwrap();
        assert_eq!(fetched.events.len(), 2);
    }

    #[tokio::test]
    async fn test_query_error_propagates() {
        let store = Arc::new(store_with_events(&[(1, "x")]));
        store.fail_stream("s");
        let fetcher = StreamFetcher::new(store);

        assert!(fetcher.fetch("g", "s", FetchWindow::new(0, 10), &QueryFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_window_skips_store() {
        let store = Arc::new(store_with_events(&[(1, "x")]));
        let fetcher = StreamFetcher::new(store.clone());

        let fetched = fetcher.fetch("g", "s", FetchWindow::new(10, 10), &QueryFilter::default()).await.unwrap();
        assert!(fetched.events.is_empty());
        assert_eq!(store.query_calls(), 0);
    }
}

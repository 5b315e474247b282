//! In-memory log store
//!
//! Serves streams and events from fixtures with the same pagination and
//! ordering rules as the remote service, and records every call so callers
//! can assert how much work a fetch did.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::{
    EventPage, ListStreamsRequest, LogEvent, LogStore, LogStream, QueryEventsRequest,
    StoreError, StreamPage, TermPattern,
};

/// Fixture-backed [`LogStore`]
pub struct MemoryStore {
    streams: RwLock<Vec<LogStream>>,
    events: RwLock<HashMap<(String, String), Vec<LogEvent>>>,
    failing_streams: RwLock<HashSet<String>>,
    fail_listing: AtomicBool,
    server_filter: bool,
    stream_page_size: usize,
    event_page_size: usize,
    latency: Option<Duration>,
    group_latency: RwLock<HashMap<String, Duration>>,

    list_calls: AtomicUsize,
    queried: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(Vec::new()),
            events: RwLock::new(HashMap::new()),
            failing_streams: RwLock::new(HashSet::new()),
            fail_listing: AtomicBool::new(false),
            server_filter: true,
            stream_page_size: 50,
            event_page_size: 10_000,
            latency: None,
            group_latency: RwLock::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stream_page_size(mut self, size: usize) -> Self {
        self.stream_page_size = size.max(1);
        self
    }

    pub fn with_event_page_size(mut self, size: usize) -> Self {
        self.event_page_size = size.max(1);
        self
    }

    /// Ignore filter patterns, like a store without server-side filtering
    pub fn without_server_filter(mut self) -> Self {
        self.server_filter = false;
        self
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay calls for one log group by `latency`, instead of the store-wide latency
    pub fn set_group_latency(&self, log_group: &str, latency: Duration) {
        self.group_latency.write().insert(log_group.to_string(), latency);
    }

    /// Register stream metadata as-is
    pub fn add_stream(&self, stream: LogStream) {
        self.streams.write().push(stream);
    }

    /// Append events to a stream without touching its metadata
    pub fn add_events(&self, log_group: &str, stream_id: &str, events: Vec<LogEvent>) {
        self.events
            .write()
            .entry((log_group.to_string(), stream_id.to_string()))
            .or_default()
            .extend(events);
    }

    /// Register a stream whose metadata is derived from its events
    pub fn add_stream_with_events(&self, log_group: &str, stream_id: &str, events: Vec<LogEvent>) {
        let first = events.iter().map(|e| e.timestamp).min();
        let last = events.iter().map(|e| e.timestamp).max();
        self.add_stream(LogStream::new(stream_id, log_group).with_event_range(first, last));
        self.add_events(log_group, stream_id, events);
    }

    /// Make every query against `stream_id` fail
    pub fn fail_stream(&self, stream_id: &str) {
        self.failing_streams.write().insert(stream_id.to_string());
    }

    /// Let queries against `stream_id` succeed again
    pub fn recover_stream(&self, stream_id: &str) {
        self.failing_streams.write().remove(stream_id);
    }

    /// Make stream listing fail (or succeed again)
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Number of stream listing calls
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of event query calls (one per page)
    pub fn query_calls(&self) -> usize {
        self.queried.lock().len()
    }

    /// Distinct streams queried, in order of first query
    pub fn queried_streams(&self) -> Vec<String> {
        let queried = self.queried.lock();
        let mut seen = HashSet::new();
        queried
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    async fn simulate_latency(&self, log_group: &str) {
        let latency = self.group_latency.read().get(log_group).copied().or(self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_offset(operation: &'static str, token: Option<&str>) -> Result<usize, StoreError> {
    match token {
        None => Ok(0),
        Some(t) => t
            .parse()
            .map_err(|_| StoreError::api(operation, format!("invalid next token: {t}"))),
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn list_streams(&self, request: &ListStreamsRequest) -> Result<StreamPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(&request.log_group).await;

        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StoreError::api("ListLogStreams", "simulated failure"));
        }

        let mut matching: Vec<LogStream> = self
            .streams
            .read()
            .iter()
            .filter(|s| s.log_group == request.log_group)
            .filter(|s| match &request.prefix {
                Some(prefix) => s.id.starts_with(prefix.as_str()),
                None => true,
            })
            .cloned()
            .collect();

        if request.order_by_recency && request.prefix.is_none() {
            matching.sort_by(LogStream::cmp_most_recent_first);
        } else {
            matching.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let offset = parse_offset("ListLogStreams", request.next_token.as_deref())?;
        let end = (offset + self.stream_page_size).min(matching.len());
        let streams = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(StreamPage {
            streams,
            next_token,
        })
    }

    async fn query_events(&self, request: &QueryEventsRequest) -> Result<EventPage, StoreError> {
        self.queried.lock().push(request.stream_id.clone());
        self.simulate_latency(&request.log_group).await;

        if self.failing_streams.read().contains(&request.stream_id) {
            return Err(StoreError::api("QueryStreamEvents", "simulated failure"));
        }

        let pattern = if self.server_filter {
            request.filter_pattern.as_deref().and_then(TermPattern::parse)
        } else {
            None
        };

        // End time is inclusive, as with the remote service
        let mut matching: Vec<LogEvent> = self
            .events
            .read()
            .get(&(request.log_group.clone(), request.stream_id.clone()))
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.timestamp >= request.start_time && e.timestamp <= request.end_time)
                    .filter(|e| pattern.as_ref().is_none_or(|p| p.matches(&e.message)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matching.sort_by_key(|e| e.timestamp);

        let page_size = request.limit.clamp(1, self.event_page_size);
        let offset = parse_offset("QueryStreamEvents", request.next_token.as_deref())?;
        let end = (offset + page_size).min(matching.len());
        let events = matching.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(EventPage { events, next_token })
    }

    fn supports_server_filter(&self) -> bool {
        self.server_filter
    }

    fn max_page_size(&self) -> usize {
        self.event_page_size
    }
}

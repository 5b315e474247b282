//! Log store client for logscope
//!
//! This crate defines the boundary to the remote log store: stream listing
//! and per-stream event queries, both paginated. [`CloudWatchStore`] talks to
//! CloudWatch Logs; [`MemoryStore`] serves fixtures from memory.

mod cloudwatch;
mod error;
mod memory;
mod pattern;

use async_trait::async_trait;

pub use cloudwatch::CloudWatchStore;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use pattern::TermPattern;

// Re-export types that are used in our public API
pub use logscope_types::{LogEvent, LogStream};

/// Request for one page of log streams
#[derive(Clone, Debug, Default)]
pub struct ListStreamsRequest {
    pub log_group: String,
    pub prefix: Option<String>,

    /// Ask for most-recent-first ordering. Ignored when `prefix` is set.
    pub order_by_recency: bool,

    pub next_token: Option<String>,
}

/// One page of log streams
#[derive(Clone, Debug, Default)]
pub struct StreamPage {
    pub streams: Vec<LogStream>,
    pub next_token: Option<String>,
}

/// Request for one page of events from a single stream
#[derive(Clone, Debug, Default)]
pub struct QueryEventsRequest {
    pub log_group: String,
    pub stream_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub filter_pattern: Option<String>,
    pub limit: usize,
    pub next_token: Option<String>,
}

/// One page of events
#[derive(Clone, Debug, Default)]
pub struct EventPage {
    pub events: Vec<LogEvent>,
    pub next_token: Option<String>,
}

/// Remote log store operations used by the fetch engine
#[async_trait]
pub trait LogStore: Send + Sync {
    /// List one page of streams in a log group
    async fn list_streams(&self, request: &ListStreamsRequest) -> Result<StreamPage, StoreError>;

    /// Query one page of events from one stream
    async fn query_events(&self, request: &QueryEventsRequest) -> Result<EventPage, StoreError>;

    /// Whether `filter_pattern` is evaluated server-side
    fn supports_server_filter(&self) -> bool {
        true
    }

    /// Largest page the store will return for event queries
    fn max_page_size(&self) -> usize;
}

//! Log fetching for logscope
//!
//! This crate provides stream discovery, bounded concurrent fetching,
//! noise tagging, the incremental fetch cache and multi-group coordination.

mod aggregate;
mod cache;
mod collector;
mod coordinator;
mod discover;
mod error;
mod fetch;
mod merge;
mod noise;
mod policy;

pub use aggregate::GroupAggregator;
pub use cache::{CacheError, DEFAULT_CACHE_TTL, FetchCache, PendingWrite};
pub use collector::{EventCollector, SignalCounts};
pub use coordinator::{GroupResults, GroupedEvent, MultiGroupCoordinator, merge_for_display};
pub use discover::{DEFAULT_STALENESS_ALLOWANCE, Discovery, StreamDiscoverer};
pub use error::{FetchError, validate_log_group};
pub use fetch::{DEFAULT_MAX_PAGES, QueryFilter, StreamEvents, StreamFetcher};
pub use merge::{is_newest_first, merge_by, merge_newest_first, sort_newest_first};
pub use noise::{DEFAULT_NOISE_PATTERNS, NoiseFilter};
pub use policy::{CountPolicy, FetchProgress, StopPolicy, StopReason};

// Re-export types used in our public API
pub use logscope_types::{
    CacheEntry, CacheKey, FetchOptions, FetchResult, FetchWindow, GroupSpec, LogEvent, LogStream,
    TaggedEvent,
};

//! Shared types for logscope
//!
//! This crate contains data structures used across multiple logscope crates.
//! All timestamps are milliseconds since the Unix epoch, matching the log
//! store's wire format.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

/// Hard upper bound for any discovery cap, including per-group overrides
pub const MAX_DISCOVERY_CAP: usize = 10_000;

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a duration to whole milliseconds, saturating at `i64::MAX`
pub fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// Log Store Types
// ============================================================================

/// A single log event as returned by the log store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    /// Event time in epoch milliseconds
    pub timestamp: i64,

    /// Raw message body
    pub message: String,

    /// Name of the stream the event was read from
    pub stream_id: String,
}

impl LogEvent {
    pub fn new(timestamp: i64, message: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
            stream_id: stream_id.into(),
        }
    }

    /// Event time as a UTC datetime (None if out of chrono's range)
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Display order: newest first, then stream name, then message.
    ///
    /// Two events only compare equal when all three fields match.
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.stream_id.cmp(&other.stream_id))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// Log stream metadata
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogStream {
    pub id: String,
    pub log_group: String,

    /// None when the stream has never ingested an event
    pub first_event_timestamp: Option<i64>,

    /// None when the stream has never ingested an event
    pub last_event_timestamp: Option<i64>,
}

impl LogStream {
    pub fn new(id: impl Into<String>, log_group: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            log_group: log_group.into(),
            first_event_timestamp: None,
            last_event_timestamp: None,
        }
    }

    pub fn with_event_range(mut self, first: Option<i64>, last: Option<i64>) -> Self {
        self.first_event_timestamp = first;
        self.last_event_timestamp = last;
        self
    }

    /// Whether the stream has ingested anything at or after `threshold`
    pub fn is_active_since(&self, threshold: i64) -> bool {
        self.last_event_timestamp.is_some_and(|last| last >= threshold)
    }

    /// Recency order: most recently written first, never-ingested streams last
    pub fn cmp_most_recent_first(&self, other: &Self) -> Ordering {
        match (self.last_event_timestamp, other.last_event_timestamp) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| self.id.cmp(&other.id))
    }
}

/// Half-open time window `[start_time, end_time)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchWindow {
    pub start_time: i64,
    pub end_time: i64,
}

impl FetchWindow {
    pub fn new(start_time: i64, end_time: i64) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Window covering the last `since` up to `now`
    pub fn since(now: i64, since: Duration) -> Self {
        Self::new(now.saturating_sub(duration_ms(since)), now)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start_time && timestamp < self.end_time
    }

    pub fn is_empty(&self) -> bool {
        self.start_time >= self.end_time
    }
}

// ============================================================================
// Fetch Results
// ============================================================================

/// An event together with its signal/noise classification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedEvent {
    pub event: LogEvent,
    pub noise: bool,
}

impl TaggedEvent {
    pub fn signal(event: LogEvent) -> Self {
        Self {
            event,
            noise: false,
        }
    }

    pub fn noise(event: LogEvent) -> Self {
        Self { event, noise: true }
    }

    pub fn timestamp(&self) -> i64 {
        self.event.timestamp
    }
}

/// Outcome of fetching one log group
#[derive(Clone, Debug, Default)]
pub struct FetchResult {
    /// Events ordered newest first (see [`LogEvent::cmp_newest_first`])
    pub events: Vec<TaggedEvent>,

    /// Set when a safety cap, page cap, or deadline cut the fetch short
    pub truncated: bool,

    /// Streams whose events were fetched successfully
    pub streams_scanned: usize,

    /// Streams whose fetch failed and were skipped
    pub streams_failed: usize,
}

impl FetchResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn signal_count(&self) -> usize {
        self.events.iter().filter(|e| !e.noise).count()
    }

    pub fn noise_count(&self) -> usize {
        self.events.iter().filter(|e| e.noise).count()
    }

    /// Newest event timestamp, if any
    pub fn newest_timestamp(&self) -> Option<i64> {
        self.events.first().map(TaggedEvent::timestamp)
    }

    /// Whether the caller should print a completeness warning
    pub fn has_warnings(&self) -> bool {
        self.truncated || self.streams_failed > 0
    }
}

// ============================================================================
// Cache Types
// ============================================================================

/// Persisted incremental fetch state for one query shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Newest event timestamp seen so far
    pub last_seen_timestamp: i64,

    /// Oldest event timestamp ever retrieved
    pub oldest_retrieved: i64,

    /// Wall-clock time of the last successful fetch
    pub last_fetch_time: i64,
}

impl CacheEntry {
    pub fn new(last_seen_timestamp: i64, oldest_retrieved: i64, last_fetch_time: i64) -> Self {
        Self {
            last_seen_timestamp,
            oldest_retrieved,
            last_fetch_time,
        }
    }

    /// Whether the entry is older than `ttl` at `now`
    pub fn is_stale(&self, now: i64, ttl: Duration) -> bool {
        now.saturating_sub(self.last_fetch_time) > duration_ms(ttl)
    }

    /// Whether the fields are internally consistent
    pub fn is_consistent(&self) -> bool {
        self.oldest_retrieved <= self.last_seen_timestamp
    }

    /// Fold a batch of observed timestamps into this entry.
    ///
    /// `last_seen_timestamp` never decreases.
    pub fn merged(previous: Option<&CacheEntry>, newest: i64, oldest: i64, now: i64) -> Self {
        match previous {
            Some(prev) => Self::new(
                prev.last_seen_timestamp.max(newest),
                prev.oldest_retrieved.min(oldest),
                now,
            ),
            None => Self::new(newest, oldest, now),
        }
    }
}

/// Composite cache key derived from the full query shape
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(log_group: &str, stream_prefix: Option<&str>, filter_pattern: Option<&str>) -> Self {
        let parts = [
            escape_key_part(log_group),
            escape_key_part(stream_prefix.unwrap_or_default()),
            escape_key_part(filter_pattern.unwrap_or_default()),
        ];
        Self(parts.join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

fn escape_key_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '\\' || c == '|' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// Query Configuration
// ============================================================================

/// One log group to fetch, with its query shape
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct GroupSpec {
    pub log_group: String,
    pub stream_prefix: Option<String>,
    pub filter_pattern: Option<String>,

    /// Overrides [`FetchOptions::discovery_cap`] for this group
    pub discovery_cap: Option<usize>,
}

impl GroupSpec {
    pub fn new(log_group: impl Into<String>) -> Self {
        Self {
            log_group: log_group.into(),
            ..Default::default()
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = Some(prefix.into());
        self
    }

    pub fn with_filter_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.filter_pattern = Some(pattern.into());
        self
    }

    pub fn with_discovery_cap(mut self, cap: usize) -> Self {
        self.discovery_cap = Some(cap);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            &self.log_group,
            self.stream_prefix.as_deref(),
            self.filter_pattern.as_deref(),
        )
    }

    /// Discovery cap for this group, bounded by [`MAX_DISCOVERY_CAP`]
    pub fn effective_discovery_cap(&self, options: &FetchOptions) -> usize {
        self.discovery_cap
            .unwrap_or(options.discovery_cap)
            .min(MAX_DISCOVERY_CAP)
    }
}

/// Tuning knobs for one fetch
#[derive(Clone, Debug, PartialEq)]
pub struct FetchOptions {
    /// Window length used when there is no usable cache entry
    pub since: Duration,

    /// Stop scheduling once this many signal events were collected
    pub target_count: usize,

    /// Maximum concurrent stream fetches within a group
    pub concurrency: usize,

    /// Maximum streams listed per group
    pub discovery_cap: usize,

    /// Maximum result pages read per stream
    pub max_pages_per_stream: usize,

    /// Maximum events accumulated per group
    pub memory_cap: usize,

    /// Wall-clock budget for one group fetch
    pub deadline: Duration,

    /// Cache entries older than this are ignored
    pub cache_ttl: Duration,

    /// Push noise exclusions to the store when it supports filter patterns
    pub server_side_exclusion: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            since: Duration::from_secs(60 * 60),
            target_count: 100,
            concurrency: 8,
            discovery_cap: 500,
            max_pages_per_stream: 10,
            memory_cap: 50_000,
            deadline: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            server_side_exclusion: true,
        }
    }
}

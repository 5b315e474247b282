//! Fetch orchestration for one log group
//!
//! A run resolves its window from the fetch cache, discovers candidate
//! streams, then fetches them newest-first through a bounded pool of tasks.
//! Scheduling stops as soon as the stop policy fires; fetches already in
//! flight are allowed to finish and are merged. A per-run deadline cancels
//! whatever is still outstanding and returns the partial result.
//!
//! The cached cursor only advances through what every stream was actually
//! read through. A failed, cancelled or unscheduled stream holds it below the
//! window start, and a page-capped stream holds it at the newest event read,
//! so the next run picks those events up.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logscope_store::{LogStore, StoreError};
use logscope_types::{
    CacheEntry, CacheKey, FetchOptions, FetchResult, FetchWindow, GroupSpec, LogStream, now_ms,
};

use crate::cache::FetchCache;
use crate::collector::EventCollector;
use crate::discover::{DEFAULT_STALENESS_ALLOWANCE, StreamDiscoverer};
use crate::error::{FetchError, validate_log_group};
use crate::fetch::{QueryFilter, StreamEvents, StreamFetcher};
use crate::noise::NoiseFilter;
use crate::policy::{CountPolicy, FetchProgress, StopPolicy, StopReason};

/// What one pool task hands back: None when cancelled by the deadline
type TaskOutput = (String, Option<Result<StreamEvents, StoreError>>);

/// Orchestrates discovery, bounded concurrent fetch and cache update
pub struct GroupAggregator {
    store: Arc<dyn LogStore>,
    cache: Arc<Mutex<FetchCache>>,
    noise: Arc<NoiseFilter>,

    /// Overrides the count policy built from the fetch options
    policy: Option<Arc<dyn StopPolicy>>,

    staleness_allowance: Duration,
}

impl GroupAggregator {
    pub fn new(
        store: Arc<dyn LogStore>,
        cache: Arc<Mutex<FetchCache>>,
        noise: Arc<NoiseFilter>,
    ) -> Self {
        Self {
            store,
            cache,
            noise,
            policy: None,
            staleness_allowance: DEFAULT_STALENESS_ALLOWANCE,
        }
    }

    /// Use a custom stop policy instead of [`CountPolicy`]
    pub fn with_policy(mut self, policy: Arc<dyn StopPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_staleness_allowance(mut self, allowance: Duration) -> Self {
        self.staleness_allowance = allowance;
        self
    }

    pub fn cache(&self) -> &Arc<Mutex<FetchCache>> {
        &self.cache
    }

    /// Fetch one log group.
    ///
    /// Only malformed input is an error. Discovery and stream failures,
    /// safety caps and the deadline degrade the result instead.
    pub async fn run(
        &self,
        group: &GroupSpec,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        validate_log_group(&group.log_group)?;
        validate_options(options)?;

        let started = Instant::now();
        let deadline = started + options.deadline;
        let now = now_ms();
        let key = group.cache_key();
        let log_group = group.log_group.as_str();

        let previous = self
            .cache
            .lock()
            .get_at(&key, now)
            .filter(|entry| !entry.is_stale(now, options.cache_ttl));
        let window = match previous {
            Some(entry) => FetchWindow::new(entry.last_seen_timestamp.saturating_add(1), now),
            None => FetchWindow::since(now, options.since),
        };
        debug!(
            log_group,
            %key,
            incremental = previous.is_some(),
            start = window.start_time,
            end = window.end_time,
            "resolved fetch window"
        );

        let cap = group.effective_discovery_cap(options);
        let discoverer = StreamDiscoverer::new(Arc::clone(&self.store))
            .with_staleness_allowance(self.staleness_allowance);
        let discovery = match tokio::time::timeout_at(
            deadline,
            discoverer.discover(log_group, group.stream_prefix.as_deref(), window, cap),
        )
        .await
        {
            Ok(discovery) => discovery,
            Err(_) => {
                warn!(log_group, "deadline expired during stream discovery");
                return Ok(FetchResult {
                    truncated: true,
                    ..Default::default()
                });
            }
        };

        if let Some(e) = &discovery.error {
            warn!(log_group, error = %e, "stream discovery failed, no streams to fetch");
        }
        if discovery.truncated {
            warn!(log_group, cap, "stream discovery stopped at cap");
        }

        let filter = Arc::new(self.query_filter(group, options));
        let pool = self
            .fetch_streams(
                log_group,
                discovery.streams,
                PoolLimits {
                    discovery_truncated: discovery.truncated,
                    discovery_cap: cap,
                    deadline,
                },
                window,
                filter,
                options,
            )
            .await;

        let counts = pool.collector.counts();
        let scanned = pool.collector.bounds();
        let mut events = pool.collector.into_sorted();
        let mut truncated = discovery.truncated
            || pool.stream_truncated
            || pool.deadline_hit
            || pool.stop.is_some_and(|r| r.truncates());
        if events.len() > options.memory_cap {
            events.truncate(options.memory_cap);
            truncated = true;
        }

        if discovery.error.is_none() {
            self.update_cache(&key, scanned, pool.cursor_ceiling, now).await;
        }

        info!(
            log_group,
            events = events.len(),
            signal = counts.signal,
            noise = counts.noise,
            streams_scanned = pool.scanned,
            streams_failed = pool.failed,
            truncated,
            stop = ?pool.stop,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "group fetch complete"
        );

        Ok(FetchResult {
            events,
            truncated,
            streams_scanned: pool.scanned,
            streams_failed: pool.failed,
        })
    }

    /// Filter applied to every stream query of a run
    fn query_filter(&self, group: &GroupSpec, options: &FetchOptions) -> QueryFilter {
        let server_side = self.store.supports_server_filter();
        let pattern = if options.server_side_exclusion && server_side {
            self.noise.exclusion_pattern(group.filter_pattern.as_deref())
        } else {
            group.filter_pattern.clone()
        };

        let filter = QueryFilter::resolve(pattern.as_deref(), server_side);
        if filter.unevaluated {
            warn!(
                log_group = %group.log_group,
                pattern = pattern.as_deref().unwrap_or_default(),
                "structured filter pattern cannot be evaluated locally, ignoring"
            );
        }
        filter
    }

    /// Run the bounded fetch pool over `streams`, newest first
    async fn fetch_streams(
        &self,
        log_group: &str,
        streams: Vec<LogStream>,
        limits: PoolLimits,
        window: FetchWindow,
        filter: Arc<QueryFilter>,
        options: &FetchOptions,
    ) -> PoolOutcome {
        let policy: Arc<dyn StopPolicy> = match &self.policy {
            Some(policy) => Arc::clone(policy),
            None => Arc::new(CountPolicy::new(options.target_count, options.memory_cap)),
        };
        let fetcher =
            StreamFetcher::new(Arc::clone(&self.store)).with_max_pages(options.max_pages_per_stream);
        let cancel = CancellationToken::new();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut pending = streams.into_iter();
        let mut outcome = PoolOutcome {
            unread_floor: window.start_time.saturating_sub(1),
            ..Default::default()
        };
        let mut progress = FetchProgress {
            discovery_truncated: limits.discovery_truncated,
            discovery_cap: limits.discovery_cap,
            ..Default::default()
        };

        loop {
            while outcome.stop.is_none() && tasks.len() < options.concurrency {
                progress.streams_remaining = pending.len();
                if let Some(reason) = policy.should_stop(&progress) {
                    debug!(log_group, %reason, ?progress, "stopped scheduling stream fetches");
                    outcome.stop = Some(reason);
                    break;
                }
                let Some(stream) = pending.next() else {
                    outcome.stop = Some(StopReason::StreamsExhausted);
                    break;
                };
                progress.streams_scheduled += 1;

                let fetcher = fetcher.clone();
                let cancel = cancel.clone();
                let log_group = log_group.to_string();
                let filter = Arc::clone(&filter);
                tasks.spawn(async move {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => None,
                        result = fetcher.fetch(&log_group, &stream.id, window, &filter) => Some(result),
                    };
                    (stream.id, result)
                });
            }

            if tasks.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = tokio::time::sleep_until(limits.deadline) => {
                    warn!(
                        log_group,
                        outstanding = tasks.len(),
                        "deadline expired, cancelling outstanding stream fetches"
                    );
                    outcome.deadline_hit = true;
                    cancel.cancel();
                    break;
                }
            };
            let Some(joined) = joined else {
                break;
            };
            self.record(log_group, joined, &mut outcome, &mut progress);

            // Take in everything that already finished before scheduling more
            while let Some(joined) = tasks.try_join_next() {
                self.record(log_group, joined, &mut outcome, &mut progress);
            }
        }

        if outcome.deadline_hit {
            while let Some(joined) = tasks.try_join_next() {
                self.record(log_group, joined, &mut outcome, &mut progress);
            }
            if !tasks.is_empty() || !pending.as_slice().is_empty() {
                outcome.hold_cursor(outcome.unread_floor);
            }
            tasks.abort_all();
        }

        outcome
    }

    fn record(
        &self,
        log_group: &str,
        joined: Result<TaskOutput, JoinError>,
        outcome: &mut PoolOutcome,
        progress: &mut FetchProgress,
    ) {
        match joined {
            Ok((_, Some(Ok(fetched)))) => {
                outcome.scanned += 1;
                outcome.stream_truncated |= fetched.truncated;
                if fetched.truncated {
                    let read_through = fetched
                        .events
                        .iter()
                        .map(|e| e.timestamp)
                        .max()
                        .unwrap_or(outcome.unread_floor);
                    debug!(log_group, stream_id = %fetched.stream_id, read_through, "stream page cap reached");
                    outcome.hold_cursor(read_through);
                }
                outcome.collector.extend(fetched.events, &self.noise);
                let counts = outcome.collector.counts();
                progress.signal_count = counts.signal;
                progress.total_events = counts.total();
            }
            Ok((stream_id, Some(Err(e)))) => {
                outcome.failed += 1;
                outcome.hold_cursor(outcome.unread_floor);
                warn!(log_group, stream_id = %stream_id, error = %e, "stream fetch failed, skipping");
            }
            Ok((stream_id, None)) => {
                outcome.hold_cursor(outcome.unread_floor);
                debug!(log_group, stream_id = %stream_id, "stream fetch cancelled");
            }
            Err(e) => {
                outcome.failed += 1;
                outcome.hold_cursor(outcome.unread_floor);
                warn!(log_group, error = %e, "stream fetch task failed");
            }
        }
    }

    /// Fold what the run scanned into the cache entry and persist it.
    ///
    /// `scanned` is the (oldest, newest) timestamp collected before any
    /// memory cap; the cursor never moves past `ceiling`.
    async fn update_cache(
        &self,
        key: &CacheKey,
        scanned: Option<(i64, i64)>,
        ceiling: Option<i64>,
        now: i64,
    ) {
        let scanned = scanned.map(|(oldest, newest)| {
            let newest = ceiling.map_or(newest, |c| newest.min(c));
            (oldest.min(newest), newest)
        });

        let snapshot = {
            let mut cache = self.cache.lock();
            let previous = cache.get_at(key, now);
            let entry = match (scanned, previous) {
                (Some((oldest, newest)), previous) => {
                    CacheEntry::merged(previous.as_ref(), newest, oldest, now)
                }
                (None, Some(previous)) => CacheEntry {
                    last_fetch_time: now,
                    ..previous
                },
                (None, None) => return,
            };
            debug!(%key, last_seen = entry.last_seen_timestamp, ?ceiling, "updated cache entry");
            cache.put(key.clone(), entry);
            cache.snapshot()
        };

        let written = match snapshot {
            Ok(None) => return,
            Ok(Some(pending)) => tokio::task::spawn_blocking(move || pending.write()).await,
            Err(e) => Ok(Err(e)),
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%key, error = %e, "failed to persist fetch cache"),
            Err(e) => warn!(%key, error = %e, "fetch cache write task failed"),
        }
    }
}

fn validate_options(options: &FetchOptions) -> Result<(), FetchError> {
    let invalid = |option, reason| Err(FetchError::InvalidOption { option, reason });
    if options.concurrency == 0 {
        return invalid("concurrency", "must be at least 1");
    }
    if options.target_count == 0 {
        return invalid("target_count", "must be at least 1");
    }
    if options.max_pages_per_stream == 0 {
        return invalid("max_pages_per_stream", "must be at least 1");
    }
    if options.memory_cap == 0 {
        return invalid("memory_cap", "must be at least 1");
    }
    if options.discovery_cap == 0 {
        return invalid("discovery_cap", "must be at least 1");
    }
    Ok(())
}

/// Bounds the pool is given by the caller
struct PoolLimits {
    discovery_truncated: bool,
    discovery_cap: usize,
    deadline: Instant,
}

/// What the pool gathered
#[derive(Default)]
struct PoolOutcome {
    collector: EventCollector,
    scanned: usize,
    failed: usize,
    stream_truncated: bool,
    deadline_hit: bool,
    stop: Option<StopReason>,

    /// Newest timestamp every stream was read through, when some stream was
    /// not read to the end of the window
    cursor_ceiling: Option<i64>,
    /// Position just before the window start
    unread_floor: i64,
}

impl PoolOutcome {
    fn hold_cursor(&mut self, timestamp: i64) {
        self.cursor_ceiling = Some(self.cursor_ceiling.map_or(timestamp, |c| c.min(timestamp)));
    }
}

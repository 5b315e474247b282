//! End-to-end group fetches against the in-memory store

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use logscope_logs::{
    CacheEntry, FetchCache, FetchOptions, FetchProgress, GroupAggregator, GroupSpec, LogEvent,
    NoiseFilter, StopPolicy, StopReason, is_newest_first,
};
use logscope_store::MemoryStore;
use logscope_types::now_ms;

fn aggregator(store: Arc<MemoryStore>) -> GroupAggregator {
    GroupAggregator::new(
        store,
        Arc::new(Mutex::new(FetchCache::in_memory(Duration::from_secs(24 * 60 * 60)))),
        Arc::new(NoiseFilter::health_checks()),
    )
}

fn events(stream: &str, timestamps: impl IntoIterator<Item = i64>, message: &str) -> Vec<LogEvent> {
    timestamps
        .into_iter()
        .map(|ts| LogEvent::new(ts, format!("{message} at {ts}"), stream))
        .collect()
}

#[tokio::test]
async fn test_stops_once_target_is_reached() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());

    let mut a = events("a", (0..3).map(|i| now - 10_000 - i), "ERROR payment declined");
    a.extend(events("a", (0..10).map(|i| now - 20_000 - i), "GET /health 200"));
    store.add_stream_with_events("g", "a", a);
    store.add_stream_with_events("g", "b", events("b", (0..4).map(|i| now - 30_000 - i), "WARN retrying"));
    store.add_stream_with_events("g", "c", events("c", [now - 40_000], "INFO idle"));

    let options = FetchOptions {
        target_count: 5,
        concurrency: 2,
        server_side_exclusion: false,
        ..Default::default()
    };
    let result = aggregator(store.clone())
        .run(&GroupSpec::new("g"), &options)
        .await
        .unwrap();

    assert_eq!(result.signal_count(), 7);
    assert_eq!(result.noise_count(), 10);
    assert_eq!(result.streams_scanned, 2);
    assert!(!result.truncated);
    assert!(!store.queried_streams().contains(&"c".to_string()));
    assert!(is_newest_first(&result.events));
}

#[tokio::test]
async fn test_exhausting_streams_is_not_truncated() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 3_000, now - 1_000], "ERROR x"));
    store.add_stream_with_events("g", "b", events("b", [now - 2_000], "ERROR y"));

    let result = aggregator(store)
        .run(&GroupSpec::new("g"), &FetchOptions::default())
        .await
        .unwrap();

    let timestamps: Vec<_> = result.events.iter().map(|e| e.timestamp()).collect();
    assert_eq!(timestamps, vec![now - 1_000, now - 2_000, now - 3_000]);
    assert_eq!(result.streams_scanned, 2);
    assert!(!result.truncated);
}

#[tokio::test]
async fn test_second_run_only_returns_newer_events() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", (1..=5).map(|i| now - i * 1_000), "ERROR"));

    let aggregator = aggregator(store.clone());
    let group = GroupSpec::new("g");
    let options = FetchOptions::default();

    let first = aggregator.run(&group, &options).await.unwrap();
    assert_eq!(first.events.len(), 5);
    let first_max = first.newest_timestamp().unwrap();
    let first_entry = aggregator.cache().lock().get(&group.cache_key()).unwrap();
    assert_eq!(first_entry.last_seen_timestamp, first_max);

    let fresh = now_ms() - 1;
    store.add_events("g", "a", events("a", [fresh], "ERROR again"));

    let second = aggregator.run(&group, &options).await.unwrap();
    assert!(second.events.iter().all(|e| e.timestamp() > first_max));
    assert_eq!(second.events.len(), 1);

    let second_entry = aggregator.cache().lock().get(&group.cache_key()).unwrap();
    assert!(second_entry.last_seen_timestamp >= first_entry.last_seen_timestamp);
    assert_eq!(second_entry.oldest_retrieved, first_entry.oldest_retrieved);
}

#[tokio::test]
async fn test_run_without_new_events_keeps_last_seen() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 2_000], "ERROR"));

    let aggregator = aggregator(store);
    let group = GroupSpec::new("g");
    let options = FetchOptions::default();

    aggregator.run(&group, &options).await.unwrap();
    let again = aggregator.run(&group, &options).await.unwrap();
    assert!(again.events.is_empty());

    let entry = aggregator.cache().lock().get(&group.cache_key()).unwrap();
    assert_eq!(entry.last_seen_timestamp, now - 2_000);
}

#[tokio::test]
async fn test_stale_cache_entry_falls_back_to_full_window() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 60_000, now - 500], "ERROR"));

    let aggregator = aggregator(store);
    let group = GroupSpec::new("g");
    let day = 24 * 60 * 60 * 1_000;
    aggregator.cache().lock().put(
        group.cache_key(),
        CacheEntry::new(now - 500, now - 500, now - day - 60_000),
    );

    let result = aggregator.run(&group, &FetchOptions::default()).await.unwrap();
    assert_eq!(result.events.len(), 2);
}

#[tokio::test]
async fn test_failed_stream_is_counted_and_skipped() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 1_000], "ERROR a"));
    store.add_stream_with_events("g", "b", events("b", [now - 2_000], "ERROR b"));
    store.fail_stream("b");

    let result = aggregator(store)
        .run(&GroupSpec::new("g"), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.streams_failed, 1);
    assert_eq!(result.streams_scanned, 1);
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.events[0].event.stream_id, "a");
    assert!(result.has_warnings());
}

#[tokio::test]
async fn test_deadline_returns_partial_result() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new().with_latency(Duration::from_millis(200)));
    store.add_stream_with_events("g", "a", events("a", [now - 1_000], "ERROR"));

    let options = FetchOptions {
        deadline: Duration::from_millis(300),
        ..Default::default()
    };
    let started = std::time::Instant::now();
    let result = aggregator(store)
        .run(&GroupSpec::new("g"), &options)
        .await
        .unwrap();

    assert!(result.truncated);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_prefix_discovery_fetches_only_matching_streams() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "api/1", events("api/1", [now - 1_000], "ERROR api"));
    store.add_stream_with_events("g", "worker/1", events("worker/1", [now - 1_000], "ERROR worker"));

    let result = aggregator(store.clone())
        .run(&GroupSpec::new("g").with_prefix("api/"), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.events.len(), 1);
    assert_eq!(store.queried_streams(), vec!["api/1".to_string()]);
}

#[tokio::test]
async fn test_cache_entries_are_isolated_by_prefix() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "api/1", events("api/1", [now - 5_000], "ERROR api"));
    store.add_stream_with_events("g", "worker/1", events("worker/1", [now - 9_000], "ERROR worker"));

    let aggregator = aggregator(store);
    let api = GroupSpec::new("g").with_prefix("api/");
    let worker = GroupSpec::new("g").with_prefix("worker/");
    let options = FetchOptions::default();

    aggregator.run(&api, &options).await.unwrap();
    let worker_result = aggregator.run(&worker, &options).await.unwrap();

    // The api run must not advance the worker window past its older events
    assert_eq!(worker_result.events.len(), 1);
    let cache = aggregator.cache().lock();
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get(&api.cache_key()).unwrap().last_seen_timestamp, now - 5_000);
    assert_eq!(cache.get(&worker.cache_key()).unwrap().last_seen_timestamp, now - 9_000);
}

#[tokio::test]
async fn test_stream_page_cap_truncates() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new().with_event_page_size(2));
    store.add_stream_with_events("g", "a", events("a", (1..=10).map(|i| now - i * 100), "ERROR"));

    let options = FetchOptions {
        max_pages_per_stream: 2,
        ..Default::default()
    };
    let result = aggregator(store)
        .run(&GroupSpec::new("g"), &options)
        .await
        .unwrap();

    assert_eq!(result.events.len(), 4);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_failed_stream_is_read_again_after_recovery() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 1_000], "ERROR a"));
    store.add_stream_with_events("g", "b", events("b", [now - 2_000], "ERROR b"));
    store.fail_stream("b");

    let aggregator = aggregator(store.clone());
    let group = GroupSpec::new("g");
    let options = FetchOptions::default();
    let first = aggregator.run(&group, &options).await.unwrap();
    assert_eq!(first.streams_failed, 1);

    store.recover_stream("b");
    let second = aggregator.run(&group, &options).await.unwrap();

    let streams: Vec<_> = second.events.iter().map(|e| e.event.stream_id.as_str()).collect();
    assert!(streams.contains(&"b"), "events from the recovered stream were skipped: {streams:?}");
    assert_eq!(second.streams_failed, 0);

    let entry = aggregator.cache().lock().get(&group.cache_key()).unwrap();
    assert_eq!(entry.last_seen_timestamp, now - 1_000);
}

#[tokio::test]
async fn test_page_capped_stream_resumes_where_it_stopped() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new().with_event_page_size(2));
    store.add_stream_with_events("g", "busy", events("busy", (1..=10).map(|i| now - i * 1_000), "ERROR busy"));
    store.add_stream_with_events("g", "quiet", events("quiet", [now - 500], "ERROR quiet"));

    let aggregator = aggregator(store);
    let group = GroupSpec::new("g");
    let options = FetchOptions {
        max_pages_per_stream: 2,
        ..Default::default()
    };

    let mut busy = BTreeSet::new();
    for _ in 0..5 {
        let result = aggregator.run(&group, &options).await.unwrap();
        busy.extend(
            result
                .events
                .iter()
                .filter(|e| e.event.stream_id == "busy")
                .map(|e| e.timestamp()),
        );
        if !result.truncated {
            break;
        }
    }

    assert_eq!(busy.len(), 10);
}

#[tokio::test]
async fn test_group_discovery_cap_overrides_options() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    for i in 0..5 {
        let id = format!("s{i}");
        store.add_stream_with_events("g", &id, events(&id, [now - 1_000 - i], "ERROR"));
    }

    let result = aggregator(store.clone())
        .run(&GroupSpec::new("g").with_discovery_cap(2), &FetchOptions::default())
        .await
        .unwrap();

    assert!(result.truncated);
    assert!(store.queried_streams().len() <= 2);
    assert_eq!(result.streams_scanned, 2);
}

/// Stops after the first stream has been scheduled
struct FirstStreamOnly;

impl StopPolicy for FirstStreamOnly {
    fn should_stop(&self, progress: &FetchProgress) -> Option<StopReason> {
        (progress.streams_scheduled >= 1).then_some(StopReason::TargetReached)
    }
}

#[tokio::test]
async fn test_custom_stop_policy_replaces_count_policy() {
    let now = now_ms();
    let store = Arc::new(MemoryStore::new());
    store.add_stream_with_events("g", "a", events("a", [now - 1_000], "ERROR a"));
    store.add_stream_with_events("g", "b", events("b", [now - 2_000], "ERROR b"));
    store.add_stream_with_events("g", "c", events("c", [now - 3_000], "ERROR c"));

    let result = aggregator(store.clone())
        .with_policy(Arc::new(FirstStreamOnly))
        .run(&GroupSpec::new("g"), &FetchOptions::default())
        .await
        .unwrap();

    assert_eq!(store.queried_streams(), vec!["a".to_string()]);
    assert_eq!(store.query_calls(), 1);
    assert_eq!(result.streams_scanned, 1);
    assert!(!result.truncated);
}

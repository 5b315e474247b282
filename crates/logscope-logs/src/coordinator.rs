//! Fan-out across log groups
//!
//! Each group runs in its own task so a failure in one never blocks or
//! corrupts another. Calls for the same log group are serialized; calls for
//! different groups run concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use logscope_types::{FetchOptions, FetchResult, GroupSpec, TaggedEvent};

use crate::aggregate::GroupAggregator;
use crate::error::FetchError;
use crate::merge::merge_by;

/// Per-group outcomes of [`MultiGroupCoordinator::run_all`], keyed by log group
pub type GroupResults = BTreeMap<String, Result<FetchResult, FetchError>>;

/// An event tagged with the log group it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupedEvent {
    pub log_group: String,
    pub event: TaggedEvent,
}

/// Runs group fetches in parallel with per-group serialization
pub struct MultiGroupCoordinator {
    aggregator: GroupAggregator,
    options: FetchOptions,
    group_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MultiGroupCoordinator {
    pub fn new(aggregator: GroupAggregator, options: FetchOptions) -> Self {
        Self {
            aggregator,
            options,
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn aggregator(&self) -> &GroupAggregator {
        &self.aggregator
    }

    /// Fetch one group.
    ///
    /// This is the entry point for both one-shot and polling consumers.
    pub async fn fetch(
        &self,
        group: &GroupSpec,
        options: &FetchOptions,
    ) -> Result<FetchResult, FetchError> {
        let lock = self.group_lock(&group.log_group);
        let _guard = lock.lock().await;
        self.aggregator.run(group, options).await
    }

    /// Fetch every group in parallel with the coordinator's default options
    pub async fn run_all(self: &Arc<Self>, groups: &[GroupSpec]) -> GroupResults {
        let handles: Vec<_> = groups
            .iter()
            .map(|group| {
                let this = Arc::clone(self);
                let group = group.clone();
                let name = group.log_group.clone();
                let handle = tokio::spawn(async move { this.fetch(&group, &this.options).await });
                (name, handle)
            })
            .collect();

        let mut results = GroupResults::new();
        for (name, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::TaskFailed(name.clone(), e.to_string())),
            };
            if let Err(e) = &result {
                warn!(log_group = %name, error = %e, "group fetch failed");
            }
            results.insert(name, result);
        }
        results
    }

    fn group_lock(&self, log_group: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.group_locks.lock();
        Arc::clone(locks.entry(log_group.to_string()).or_default())
    }
}

/// Merge every successful group result into one newest-first list.
///
/// Events with equal order keys are ordered by log group name.
pub fn merge_for_display(results: &GroupResults) -> Vec<GroupedEvent> {
    results
        .iter()
        .filter_map(|(name, result)| result.as_ref().ok().map(|r| (name, r)))
        .map(|(name, result)| {
            result
                .events
                .iter()
                .map(|event| GroupedEvent {
                    log_group: name.clone(),
                    event: event.clone(),
                })
                .collect::<Vec<_>>()
        })
        .fold(Vec::new(), |merged, group_events| {
            merge_by(merged, group_events, |a, b| {
                a.event
                    .event
                    .cmp_newest_first(&b.event.event)
                    .then_with(|| a.log_group.cmp(&b.log_group))
            })
        })
}

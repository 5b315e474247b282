//! When to stop scheduling stream fetches
//!
//! The aggregator consults one predicate before every new fetch. It only
//! looks at counts; time coverage is deliberately not part of the decision.

use std::fmt;

/// Running state of one group fetch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchProgress {
    /// Signal events collected so far
    pub signal_count: usize,

    /// All events collected so far, noise included
    pub total_events: usize,

    /// Stream fetches started so far
    pub streams_scheduled: usize,

    /// Discovered streams not yet scheduled
    pub streams_remaining: usize,

    /// Whether discovery stopped at its cap
    pub discovery_truncated: bool,

    /// Discovery cap in effect for this group
    pub discovery_cap: usize,
}

/// Why scheduling stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Enough signal events were collected
    TargetReached,

    /// Every discovered stream was scheduled
    StreamsExhausted,

    /// As many streams as the discovery cap allows were scheduled
    DiscoveryCapHit,

    /// The event memory cap was reached
    MemoryCapHit,
}

impl StopReason {
    /// Whether stopping for this reason means the result is incomplete
    pub fn truncates(&self) -> bool {
        matches!(self, Self::DiscoveryCapHit | Self::MemoryCapHit)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TargetReached => "target reached",
            Self::StreamsExhausted => "streams exhausted",
            Self::DiscoveryCapHit => "discovery cap hit",
            Self::MemoryCapHit => "memory cap hit",
        };
        f.write_str(s)
    }
}

/// Decides whether to stop scheduling new stream fetches
pub trait StopPolicy: Send + Sync {
    fn should_stop(&self, progress: &FetchProgress) -> Option<StopReason>;
}

/// Count-based policy: stop on enough signal, no work left, or a safety cap
#[derive(Clone, Copy, Debug)]
pub struct CountPolicy {
    pub target_count: usize,
    pub memory_cap: usize,
}

impl CountPolicy {
    pub fn new(target_count: usize, memory_cap: usize) -> Self {
        Self {
            target_count,
            memory_cap,
        }
    }
}

impl StopPolicy for CountPolicy {
    fn should_stop(&self, progress: &FetchProgress) -> Option<StopReason> {
        if progress.total_events >= self.memory_cap {
            Some(StopReason::MemoryCapHit)
        } else if progress.signal_count >= self.target_count {
            Some(StopReason::TargetReached)
        } else if progress.discovery_truncated
            && progress.streams_scheduled >= progress.discovery_cap
        {
            Some(StopReason::DiscoveryCapHit)
        } else if progress.streams_remaining == 0 {
            Some(StopReason::StreamsExhausted)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(signal: usize, total: usize, remaining: usize) -> FetchProgress {
        FetchProgress {
            signal_count: signal,
            total_events: total,
            streams_remaining: remaining,
            discovery_cap: 500,
            ..Default::default()
        }
    }

    #[test]
    fn test_continues_while_short_of_target() {
        let policy = CountPolicy::new(5, 100);
        assert_eq!(policy.should_stop(&progress(4, 20, 3)), None);
    }

    #[test]
    fn test_stops_on_target() {
        let policy = CountPolicy::new(5, 100);
        assert_eq!(
            policy.should_stop(&progress(7, 20, 3)),
            Some(StopReason::TargetReached)
        );
    }

    #[test]
    fn test_noise_does_not_count_toward_target() {
        let policy = CountPolicy::new(5, 100);
        assert_eq!(policy.should_stop(&progress(3, 13, 1)), None);
    }

    #[test]
    fn test_memory_cap_wins() {
        let policy = CountPolicy::new(5, 100);
        assert_eq!(
            policy.should_stop(&progress(50, 100, 3)),
            Some(StopReason::MemoryCapHit)
        );
        assert!(StopReason::MemoryCapHit.truncates());
    }

    #[test]
    fn test_exhausted() {
        let policy = CountPolicy::new(5, 100);
        assert_eq!(
            policy.should_stop(&progress(0, 0, 0)),
            Some(StopReason::StreamsExhausted)
        );
        assert!(!StopReason::StreamsExhausted.truncates());
    }

    #[test]
    fn test_discovery_cap() {
        let policy = CountPolicy::new(5, 100);
        let state = FetchProgress {
            streams_scheduled: 2,
            discovery_truncated: true,
            discovery_cap: 2,
            ..Default::default()
        };
        assert_eq!(policy.should_stop(&state), Some(StopReason::DiscoveryCapHit));
    }
}

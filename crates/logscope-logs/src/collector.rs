use logscope_types::{LogEvent, TaggedEvent};

use crate::merge::sort_newest_first;
use crate::noise::NoiseFilter;

/// Accumulates tagged events from stream fetches for one group
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<TaggedEvent>,
    counts: SignalCounts,
    oldest: Option<i64>,
    newest: Option<i64>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag and add one stream's events
    pub fn extend(&mut self, events: Vec<LogEvent>, noise: &NoiseFilter) {
        self.events.reserve(events.len());
        for event in events {
            self.oldest = Some(self.oldest.map_or(event.timestamp, |o| o.min(event.timestamp)));
            self.newest = Some(self.newest.map_or(event.timestamp, |n| n.max(event.timestamp)));

            let tagged = noise.tag(event);
            if tagged.noise {
                self.counts.noise += 1;
            } else {
                self.counts.signal += 1;
            }
            self.events.push(tagged);
        }
    }

    pub fn counts(&self) -> SignalCounts {
        self.counts
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Oldest and newest timestamp collected, if any
    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.oldest.zip(self.newest)
    }

    /// Consume into a newest-first list
    pub fn into_sorted(self) -> Vec<TaggedEvent> {
        let mut events = self.events;
        sort_newest_first(&mut events);
        events
    }
}

/// Signal and noise counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SignalCounts {
    pub signal: usize,
    pub noise: usize,
}

impl SignalCounts {
    pub fn total(&self) -> usize {
        self.signal + self.noise
    }
}

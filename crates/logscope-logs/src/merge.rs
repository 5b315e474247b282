use std::cmp::Ordering;

use logscope_types::TaggedEvent;

/// Merge two lists that are each sorted by `cmp` into one sorted list
pub fn merge_by<T, F>(left: Vec<T>, right: Vec<T>, mut cmp: F) -> Vec<T>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(l, r) != Ordering::Greater,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }

    merged
}

/// Merge two newest-first event lists
pub fn merge_newest_first(left: Vec<TaggedEvent>, right: Vec<TaggedEvent>) -> Vec<TaggedEvent> {
    merge_by(left, right, |a, b| a.event.cmp_newest_first(&b.event))
}

/// Sort events newest first, ties broken by stream then message
pub fn sort_newest_first(events: &mut [TaggedEvent]) {
    events.sort_by(|a, b| a.event.cmp_newest_first(&b.event));
}

/// Check the newest-first invariant
pub fn is_newest_first(events: &[TaggedEvent]) -> bool {
    events
        .windows(2)
        .all(|w| w[0].event.cmp_newest_first(&w[1].event) != Ordering::Greater)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logscope_types::LogEvent;
    use proptest::prelude::*;

    fn event(ts: i64, stream: &str) -> TaggedEvent {
        TaggedEvent::signal(LogEvent::new(ts, "m", stream))
    }

    #[test]
    fn test_merge_interleaves() {
        let left = vec![event(9, "a"), event(5, "a"), event(1, "a")];
        let right = vec![event(8, "b"), event(5, "b"), event(2, "b")];
        let merged = merge_newest_first(left, right);
        let order: Vec<_> = merged
            .iter()
            .map(|e| (e.timestamp(), e.event.stream_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(9, "a"), (8, "b"), (5, "a"), (5, "b"), (2, "b"), (1, "a")]
        );
    }

    #[test]
    fn test_merge_with_empty_side() {
        let left = vec![event(3, "a")];
        assert_eq!(merge_newest_first(left.clone(), Vec::new()), left);
        assert_eq!(merge_newest_first(Vec::new(), left.clone()), left);
    }

    fn stream_events(stream: &'static str) -> impl Strategy<Value = Vec<TaggedEvent>> {
        proptest::collection::vec((0i64..1_000, any::<bool>()), 0..50).prop_map(move |raw| {
            let mut events: Vec<_> = raw
                .into_iter()
                .map(|(ts, noise)| TaggedEvent {
                    event: LogEvent::new(ts, format!("m{ts}"), stream),
                    noise,
                })
                .collect();
            sort_newest_first(&mut events);
            events
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 200,
            .. ProptestConfig::default()
        })]

        #[test]
        fn prop_merge_keeps_order_and_every_event(
            left in stream_events("stream-a"),
            right in stream_events("stream-b"),
        ) {
            let mut expected: Vec<_> = left.iter().chain(right.iter()).cloned().collect();
            sort_newest_first(&mut expected);

            let merged = merge_newest_first(left.clone(), right.clone());

            prop_assert_eq!(merged.len(), left.len() + right.len());
            prop_assert!(is_newest_first(&merged));
            prop_assert_eq!(merged, expected);
        }
    }
}

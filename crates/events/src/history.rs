//! Immutable, strictly contiguous event history of one aggregate.
//!
//! A `History` is a value: every append produces a new history and leaves the
//! old one untouched. The event store owns the authoritative copy; everything
//! else holds derived, disposable clones.

use thiserror::Error;

use mailfold_core::{AggregateId, EventId};

use crate::Event;

/// Why an event cannot follow a history.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Appending an event whose id is not the history's next expected id.
    #[error("expected event {expected}, found {found}")]
    Mismatch { expected: EventId, found: EventId },

    /// A loaded history skips one or more ids.
    #[error("gap in history: expected event {expected}, found {found}")]
    Gap { expected: EventId, found: EventId },

    /// A loaded history repeats or reorders ids.
    #[error("duplicate or out-of-order event: expected {expected}, found {found}")]
    Duplicate { expected: EventId, found: EventId },

    /// An event belongs to another aggregate.
    #[error("event {event_id} belongs to '{found}', history is for '{expected}'")]
    AggregateMismatch {
        event_id: EventId,
        expected: AggregateId,
        found: AggregateId,
    },
}

/// Ordered events of one aggregate.
///
/// Invariant: event `i` has id `EventId::from_offset(i)`, and all events share
/// one aggregate id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct History<P> {
    events: Vec<Event<P>>,
}

impl<P> Default for History<P> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<P> History<P> {
    /// History of an aggregate with no recorded events yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Validate a sequence loaded from storage.
    ///
    /// Gaps, duplicates and foreign events are reported, never repaired.
    pub fn from_events(events: Vec<Event<P>>) -> Result<Self, HistoryError> {
        let mut expected = EventId::first();
        if let Some(head) = events.first() {
            let owner = head.aggregate_id();
            for event in &events {
                check_owner(owner, event)?;
                let found = event.event_id();
                if found > expected {
                    return Err(HistoryError::Gap { expected, found });
                }
                if found < expected {
                    return Err(HistoryError::Duplicate { expected, found });
                }
                expected = expected.next();
            }
        }
        Ok(Self { events })
    }

    /// `first()` if empty, otherwise the id following the last event.
    pub fn next_expected_id(&self) -> EventId {
        self.events
            .last()
            .map_or(EventId::first(), |e| e.event_id().next())
    }

    pub fn last_event_id(&self) -> Option<EventId> {
        self.events.last().map(Event::event_id)
    }

    /// Aggregate this history belongs to (unknown while empty).
    pub fn aggregate_id(&self) -> Option<&AggregateId> {
        self.events.first().map(Event::aggregate_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event<P>] {
        &self.events
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Event<P>> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<Event<P>> {
        self.events
    }

    /// Events strictly after `cursor` (all events when `cursor` is `None`).
    pub fn events_after(&self, cursor: Option<EventId>) -> &[Event<P>] {
        let start = self
            .events
            .partition_point(|e| Some(e.event_id()) <= cursor);
        &self.events[start..]
    }

    /// Replay events in ascending id order into a state.
    pub fn fold<S>(&self, init: S, mut f: impl FnMut(S, &Event<P>) -> S) -> S {
        self.events.iter().fold(init, |state, event| f(state, event))
    }

    fn admit(&self, expected: EventId, event: &Event<P>) -> Result<(), HistoryError> {
        if let Some(owner) = self.aggregate_id() {
            check_owner(owner, event)?;
        }
        if event.event_id() != expected {
            return Err(HistoryError::Mismatch {
                expected,
                found: event.event_id(),
            });
        }
        Ok(())
    }
}

impl<P: Clone> History<P> {
    /// New history with `event` appended, iff `event` carries the next expected id.
    pub fn append(&self, event: Event<P>) -> Result<Self, HistoryError> {
        self.append_all([event])
    }

    /// New history with all `events` appended; all-or-nothing.
    pub fn append_all(
        &self,
        events: impl IntoIterator<Item = Event<P>>,
    ) -> Result<Self, HistoryError> {
        let mut next = self.clone();
        for event in events {
            let expected = next.next_expected_id();
            next.admit(expected, &event)?;
            next.events.push(event);
        }
        Ok(next)
    }
}

impl<'a, P> IntoIterator for &'a History<P> {
    type Item = &'a Event<P>;
    type IntoIter = core::slice::Iter<'a, Event<P>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

fn check_owner<P>(owner: &AggregateId, event: &Event<P>) -> Result<(), HistoryError> {
    if event.aggregate_id() != owner {
        return Err(HistoryError::AggregateMismatch {
            event_id: event.event_id(),
            expected: owner.clone(),
            found: event.aggregate_id().clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number_events;
    use proptest::prelude::*;

    fn agg(key: &str) -> AggregateId {
        AggregateId::new(key).unwrap()
    }

    fn ev(offset: u64, key: &str, payload: i64) -> Event<i64> {
        Event::new(EventId::from_offset(offset), agg(key), payload)
    }

    #[test]
    fn empty_history_expects_first() {
        let history: History<i64> = History::empty();
        assert!(history.is_empty());
        assert_eq!(history.next_expected_id(), EventId::first());
        assert_eq!(history.last_event_id(), None);
        assert_eq!(history.aggregate_id(), None);
    }

    #[test]
    fn append_produces_a_new_history_and_leaves_the_old_one() {
        let empty = History::empty();
        let one = empty.append(ev(0, "a", 1)).unwrap();

        assert!(empty.is_empty());
        assert_eq!(one.events(), &[ev(0, "a", 1)]);
        assert_eq!(one.next_expected_id(), EventId::first().next());
    }

    #[test]
    fn append_rejects_a_stale_id() {
        let one = History::empty().append(ev(0, "a", 1)).unwrap();
        let err = one.append(ev(0, "a", 2)).unwrap_err();

        assert_eq!(
            err,
            HistoryError::Mismatch {
                expected: EventId::first().next(),
                found: EventId::first(),
            }
        );
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn append_rejects_events_of_another_aggregate() {
        let one = History::empty().append(ev(0, "a", 1)).unwrap();
        let err = one.append(ev(1, "b", 2)).unwrap_err();
        assert!(matches!(err, HistoryError::AggregateMismatch { .. }));
    }

    #[test]
    fn append_all_is_all_or_nothing() {
        let one = History::empty().append(ev(0, "a", 1)).unwrap();
        let err = one
            .append_all(vec![ev(1, "a", 2), ev(3, "a", 3)])
            .unwrap_err();

        assert!(matches!(err, HistoryError::Mismatch { .. }));
        assert_eq!(one.len(), 1);
    }

    #[test]
    fn from_events_reports_gaps() {
        let err = History::from_events(vec![ev(0, "a", 1), ev(2, "a", 2)]).unwrap_err();
        assert_eq!(
            err,
            HistoryError::Gap {
                expected: EventId::from_offset(1),
                found: EventId::from_offset(2),
            }
        );
    }

    #[test]
    fn from_events_reports_duplicates_and_reordering() {
        let dup = History::from_events(vec![ev(0, "a", 1), ev(0, "a", 1)]).unwrap_err();
        assert!(matches!(dup, HistoryError::Duplicate { .. }));

        let reordered =
            History::from_events(vec![ev(1, "a", 1), ev(0, "a", 1)]).unwrap_err();
        assert!(matches!(reordered, HistoryError::Gap { .. }));
    }

    #[test]
    fn from_events_rejects_foreign_events() {
        let err = History::from_events(vec![ev(0, "a", 1), ev(1, "b", 1)]).unwrap_err();
        assert!(matches!(err, HistoryError::AggregateMismatch { .. }));
    }

    #[test]
    fn events_after_returns_the_unprocessed_suffix() {
        let history =
            History::from_events(number_events(&agg("a"), EventId::first(), [10, 20, 30]))
                .unwrap();

        assert_eq!(history.events_after(None).len(), 3);
        assert_eq!(
            history.events_after(Some(EventId::first())).first().map(|e| *e.payload()),
            Some(20)
        );
        assert!(history.events_after(Some(EventId::from_offset(2))).is_empty());
        assert!(history.events_after(Some(EventId::from_offset(99))).is_empty());
    }

    #[test]
    fn fold_replays_in_ascending_order() {
        let history =
            History::from_events(number_events(&agg("a"), EventId::first(), [1, 2, 3]))
                .unwrap();
        let seen = history.fold(Vec::new(), |mut acc, e| {
            acc.push(e.event_id());
            acc
        });
        assert_eq!(
            seen,
            vec![
                EventId::from_offset(0),
                EventId::from_offset(1),
                EventId::from_offset(2)
            ]
        );
    }

    proptest! {
        #[test]
        fn fold_is_deterministic(payloads in prop::collection::vec(-1_000i64..1_000, 0..32)) {
            let id = agg("quota");
            let history = History::empty()
                .append_all(number_events(&id, EventId::first(), payloads.clone()))
                .unwrap();

            let fold = |h: &History<i64>| {
                h.fold((0i64, Vec::new()), |(sum, mut trail), e| {
                    trail.push(sum);
                    (sum + e.payload(), trail)
                })
            };

            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let h = history.clone();
                    std::thread::spawn(move || fold(&h))
                })
                .collect();
            let expected = fold(&history);
            for handle in handles {
                prop_assert_eq!(handle.join().unwrap(), expected.clone());
            }
            prop_assert_eq!(expected.0, payloads.iter().sum::<i64>());
        }

        #[test]
        fn valid_histories_round_trip_through_validation(n in 0usize..32) {
            let id = agg("a");
            let events = number_events(&id, EventId::first(), 0..n as i64);
            let history = History::from_events(events.clone()).unwrap();
            prop_assert_eq!(history.len(), n);
            prop_assert_eq!(history.next_expected_id(), EventId::from_offset(n as u64));
            for (i, e) in history.iter().enumerate() {
                prop_assert_eq!(e.event_id(), EventId::from_offset(i as u64));
            }
        }

        #[test]
        fn histories_are_equal_iff_their_events_are_equal(
            a in prop::collection::vec(0i64..3, 0..4),
            b in prop::collection::vec(0i64..3, 0..4),
        ) {
            let id = agg("a");
            let ha = History::from_events(number_events(&id, EventId::first(), a.clone())).unwrap();
            let hb = History::from_events(number_events(&id, EventId::first(), b.clone())).unwrap();
            prop_assert_eq!(ha == hb, a == b);
        }
    }
}

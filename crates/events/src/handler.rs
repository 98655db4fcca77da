use mailfold_core::Aggregate;

use crate::{Event, History, number_events};

/// Fold a history into an aggregate, in ascending id order.
///
/// Replaying the same history always yields the same state.
pub fn rehydrate<A>(mut aggregate: A, history: &History<A::Event>) -> A
where
    A: Aggregate,
{
    for event in history {
        aggregate.apply(event.event_id(), event.payload());
    }
    aggregate
}

/// Decide the events a command produces against a previously read history.
///
/// This is the canonical event-sourced lifecycle without IO:
///
/// 1. **Rehydrate**: fold `history` into the aggregate built by `make_aggregate`
/// 2. **Decide**: call `handle(command)` (pure, no mutation)
/// 3. **Number**: assign ids starting at `history.next_expected_id()`
///
/// The returned candidate events are only valid for submission while `history`
/// is still current; the event store rejects them otherwise.
pub fn execute<A>(
    history: &History<A::Event>,
    command: &A::Command,
    make_aggregate: impl FnOnce() -> A,
) -> Result<Vec<Event<A::Event>>, A::Error>
where
    A: Aggregate,
{
    let aggregate = rehydrate(make_aggregate(), history);
    let decided = aggregate.handle(command)?;
    Ok(number_events(
        aggregate.id(),
        history.next_expected_id(),
        decided,
    ))
}

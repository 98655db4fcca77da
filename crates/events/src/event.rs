use serde::{Deserialize, Serialize};

use mailfold_core::{AggregateId, EventId};

/// A domain event payload.
///
/// Payloads are:
/// - **immutable** (treat them as facts)
/// - **opaque** to the event log (only the domain interprets them)
/// - designed to be **append-only**
pub trait DomainEvent: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "quota.threshold.changed").
    fn event_type(&self) -> &'static str;
}

/// An event as recorded in an aggregate's history.
///
/// This is the unit you append to the event store:
/// - `event_id` is the position within the aggregate's history
/// - `aggregate_id` names the history the event belongs to
/// - `payload` is the domain-defined fact
///
/// Two events are equal iff all three fields are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event<P> {
    event_id: EventId,
    aggregate_id: AggregateId,
    payload: P,
}

impl<P> Event<P> {
    pub fn new(event_id: EventId, aggregate_id: AggregateId, payload: P) -> Self {
        Self {
            event_id,
            aggregate_id,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_payload(self) -> P {
        self.payload
    }
}

/// Number a batch of payloads contiguously, starting at `first`.
///
/// Callers pass the `next_expected_id()` of a freshly read history.
pub fn number_events<P>(
    aggregate_id: &AggregateId,
    first: EventId,
    payloads: impl IntoIterator<Item = P>,
) -> Vec<Event<P>> {
    let mut next = first;
    payloads
        .into_iter()
        .map(|payload| {
            let event = Event::new(next, aggregate_id.clone(), payload);
            next = next.next();
            event
        })
        .collect()
}

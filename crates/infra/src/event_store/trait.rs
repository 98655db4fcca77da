use std::sync::Arc;

use thiserror::Error;

use mailfold_core::{AggregateId, EventId};
use mailfold_events::Event;

/// Outcome of a backend write that reached the storage.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// All events were persisted.
    Persisted,
    /// The stored stream had moved on; nothing was written.
    Conflict { actual_next: EventId },
}

/// Storage-level failure reported by a backend.
///
/// A backend error never implies a partial write: implementations must persist
/// a batch atomically or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached or refused the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned data it could not decode.
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency, integrity) as
/// opposed to domain errors (validation, business invariants).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventStoreError {
    /// The submitted batch does not start at the aggregate's next expected id.
    /// The caller re-reads the history, recomputes its events and resubmits.
    #[error("optimistic concurrency check failed for '{aggregate_id}': expected {expected}, found {found}")]
    Concurrency {
        aggregate_id: AggregateId,
        expected: EventId,
        found: EventId,
    },

    /// The backend failed; the in-flight append was aborted, prior history intact.
    #[error("storage error: {0}")]
    Storage(String),

    /// The stored history of this aggregate is corrupt; the aggregate is unusable.
    #[error("invariant violated for '{aggregate_id}': {reason}")]
    InvariantViolation {
        aggregate_id: AggregateId,
        reason: String,
    },

    /// The batch itself is malformed (foreign events, non-contiguous ids).
    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

impl From<BackendError> for EventStoreError {
    fn from(value: BackendError) -> Self {
        EventStoreError::Storage(value.to_string())
    }
}

/// Pluggable persistence contract behind the event store.
///
/// The store is agnostic to the persistence technology: any backend that
/// satisfies this contract is acceptable.
///
/// ## Implementation Requirements
///
/// - `load_events` returns previously persisted events in the order they were
///   persisted (the store re-validates contiguity and refuses corrupt streams)
/// - `persist` is atomic: either every event is stored or none is
/// - `persist` compares `expected_next` with the stored stream and answers
///   `Conflict` without writing when they differ
/// - implementations are `Send + Sync`; the store calls them from many threads,
///   but never concurrently for the same aggregate
pub trait EventStoreBackend<P>: Send + Sync {
    /// Load the full stream of an aggregate (empty if never written).
    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<Event<P>>, BackendError>;

    /// Persist `events`, which start at `expected_next`, atomically.
    fn persist(
        &self,
        aggregate_id: &AggregateId,
        expected_next: EventId,
        events: &[Event<P>],
    ) -> Result<PersistOutcome, BackendError>;
}

impl<P, B> EventStoreBackend<P> for Arc<B>
where
    B: EventStoreBackend<P> + ?Sized,
{
    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<Event<P>>, BackendError> {
        (**self).load_events(aggregate_id)
    }

    fn persist(
        &self,
        aggregate_id: &AggregateId,
        expected_next: EventId,
        events: &[Event<P>],
    ) -> Result<PersistOutcome, BackendError> {
        (**self).persist(aggregate_id, expected_next, events)
    }
}

//! Aggregate root traits for event-sourced domain models.

use crate::id::{AggregateId, EventId};

/// Aggregate root marker + minimal interface.
///
/// This is intentionally small so domain modules decide how they model state
/// transitions without bringing in any infrastructure concerns.
pub trait AggregateRoot {
    /// Returns the aggregate identifier.
    fn id(&self) -> &AggregateId;

    /// Id of the last event folded into this state, `None` for a fresh aggregate.
    ///
    /// The next event this aggregate would emit is `last_event_id().map_or(first, next)`.
    fn last_event_id(&self) -> Option<EventId>;
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns event payloads.
/// - **State mutation**: `apply(&mut self, id, payload)` evolves state.
///
/// Aggregates must not perform IO or side effects. They only return payloads
/// describing what happened; the event log assigns ids.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    ///
    /// Implementations must remain deterministic and record `event_id` so that
    /// `last_event_id()` tracks the folded position.
    fn apply(&mut self, event_id: EventId, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. State evolution is done through `apply`.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

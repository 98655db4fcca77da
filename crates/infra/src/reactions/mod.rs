//! Idempotent reaction dispatch over an at-least-once event stream.
//!
//! Committed events reach reactors more than once (live notification, catch-up
//! after a restart, retries). [`ReactionRunner`] turns that into exactly one
//! effect per event with a monotonic per-consumer, per-aggregate cursor:
//!
//! ```text
//! event.id <= cursor  → skip
//! event.id == next    → react, then advance cursor to event.id
//! event.id >  next    → behind: catch up from the store first
//! ```
//!
//! The effect and its cursor advance form one unit: a failed effect leaves the
//! cursor untouched, so the pair is retried on the next delivery. The unit is
//! not atomic, though. When the process dies or the cursor store fails between
//! the two, the next delivery runs the effect again, so effects must be keyed
//! by `(aggregate_id, event_id)` downstream (see `NotificationSink`).

pub mod cursor_store;
pub mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, error};

use mailfold_core::{AggregateId, EventId};
use mailfold_events::{Event, Reactor};

use crate::event_store::{EventListener, EventStore, EventStoreBackend, EventStoreError};

pub use cursor_store::{CursorStore, CursorStoreError, InMemoryCursorStore};
pub use worker::{CommittedBatch, QueuedListener, ReactionWorker, WorkerHandle};

#[derive(Debug, Error)]
pub enum ReactionError {
    #[error(transparent)]
    Cursor(#[from] CursorStoreError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// The effect failed; the cursor was not advanced.
    #[error("reactor '{consumer}' failed on {event_id} of '{aggregate_id}': {source}")]
    Reactor {
        consumer: &'static str,
        aggregate_id: AggregateId,
        event_id: EventId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A delivery skipped events the consumer has not processed yet.
    #[error("reactor '{consumer}' is behind on '{aggregate_id}': expected {expected}, got {found}")]
    Behind {
        consumer: &'static str,
        aggregate_id: AggregateId,
        expected: EventId,
        found: EventId,
    },

    #[error("reaction lock poisoned")]
    Poisoned,
}

/// What a delivery did.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ReactionReport {
    /// Events whose effect ran.
    pub applied: usize,
    /// Events at or before the cursor.
    pub skipped: usize,
}

/// Runs a reactor under the cursor discipline.
///
/// Deliveries for one aggregate are serialised by a per-aggregate lock; other
/// aggregates proceed in parallel. Register the runner directly as an
/// `EventListener` for synchronous reactions, or put a `ReactionWorker` in
/// front of it when effects are slow.
pub struct ReactionRunner<R, C> {
    reactor: R,
    cursors: C,
    locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl<R, C> core::fmt::Debug for ReactionRunner<R, C>
where
    R: Reactor,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReactionRunner")
            .field("reactor", &self.reactor.name())
            .finish_non_exhaustive()
    }
}

impl<R, C> ReactionRunner<R, C>
where
    R: Reactor,
    C: CursorStore,
{
    pub fn new(reactor: R, cursors: C) -> Self {
        Self {
            reactor,
            cursors,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    pub fn cursors(&self) -> &C {
        &self.cursors
    }

    /// Last event of `aggregate_id` this reactor fully processed.
    pub fn cursor(&self, aggregate_id: &AggregateId) -> Result<Option<EventId>, ReactionError> {
        Ok(self.cursors.get(self.reactor.name(), aggregate_id)?)
    }

    /// Deliver committed events of one aggregate, in ascending id order.
    pub fn deliver(
        &self,
        aggregate_id: &AggregateId,
        events: &[Event<R::Ev>],
    ) -> Result<ReactionReport, ReactionError> {
        let consumer = self.reactor.name();
        let lock = self.lock_for(aggregate_id)?;
        let _guard = lock.lock().map_err(|_| ReactionError::Poisoned)?;

        let mut cursor = self.cursors.get(consumer, aggregate_id)?;
        let mut report = ReactionReport::default();

        for event in events {
            let found = event.event_id();
            if Some(found) <= cursor {
                report.skipped += 1;
                continue;
            }
            let expected = cursor.map_or(EventId::first(), EventId::next);
            if found != expected {
                return Err(ReactionError::Behind {
                    consumer,
                    aggregate_id: aggregate_id.clone(),
                    expected,
                    found,
                });
            }

            self.reactor
                .react(aggregate_id, event)
                .map_err(|err| ReactionError::Reactor {
                    consumer,
                    aggregate_id: aggregate_id.clone(),
                    event_id: found,
                    source: Box::new(err),
                })?;

            if let Err(err) = self.cursors.advance(consumer, aggregate_id, cursor, found) {
                // The effect ran but its cursor did not move: the next delivery repeats it.
                error!(consumer, aggregate_id = %aggregate_id, event_id = %found, error = %err, "cursor advance failed after effect");
                return Err(err.into());
            }
            cursor = Some(found);
            report.applied += 1;
        }

        debug!(
            consumer,
            aggregate_id = %aggregate_id,
            applied = report.applied,
            skipped = report.skipped,
            "delivered events"
        );
        Ok(report)
    }

    /// Deliver everything the store holds past this reactor's cursor.
    ///
    /// This is the restart path: committed events whose effect never ran
    /// (crash, failed listener, stopped worker) run exactly once here.
    pub fn catch_up<B>(
        &self,
        store: &EventStore<R::Ev, B>,
        aggregate_id: &AggregateId,
    ) -> Result<ReactionReport, ReactionError>
    where
        B: EventStoreBackend<R::Ev>,
    {
        let history = store.get_history(aggregate_id)?;
        let cursor = self.cursor(aggregate_id)?;
        self.deliver(aggregate_id, history.events_after(cursor))
    }

    fn lock_for(&self, aggregate_id: &AggregateId) -> Result<Arc<Mutex<()>>, ReactionError> {
        let mut locks = self.locks.lock().map_err(|_| ReactionError::Poisoned)?;
        Ok(locks.entry(aggregate_id.clone()).or_default().clone())
    }
}

impl<R, C> EventListener<R::Ev> for ReactionRunner<R, C>
where
    R: Reactor,
    C: CursorStore,
{
    fn name(&self) -> &str {
        self.reactor.name()
    }

    fn on_committed(&self, aggregate_id: &AggregateId, events: &[Event<R::Ev>]) -> anyhow::Result<()> {
        self.deliver(aggregate_id, events)?;
        Ok(())
    }
}

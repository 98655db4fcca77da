//! Append-only event store.
//!
//! The [`EventStore`] is the sole authority over aggregate histories and the
//! only place where concurrent writers are reconciled. It sits on top of a
//! pluggable [`EventStoreBackend`] and adds:
//!
//! - **Optimistic concurrency**: a batch commits only if it starts at the
//!   aggregate's current next expected id
//! - **Per-aggregate critical sections**: appends to one aggregate never block
//!   or observe appends to another
//! - **Integrity on reload**: streams are re-validated when first loaded; a
//!   corrupt stream makes its aggregate unusable instead of being repaired
//! - **Notification**: registered listeners receive each committed batch

pub mod in_memory;
pub mod listener;
pub mod r#trait;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};

use tracing::{debug, error, warn};

use mailfold_core::AggregateId;
use mailfold_events::{Event, History};

pub use in_memory::InMemoryBackend;
pub use listener::EventListener;
pub use r#trait::{BackendError, EventStoreBackend, EventStoreError, PersistOutcome};

enum Slot<P> {
    /// Not read from the backend yet (or invalidated by a backend conflict).
    Unloaded,
    /// Authoritative history.
    Ready(History<P>),
    /// The backend returned a corrupt stream.
    Unusable(String),
}

/// Per-aggregate state and locks.
///
/// `state` is the conflict-check-and-commit critical section. Committed
/// batches are queued on `pending` while `state` is still held, so the queue is
/// in commit order. Whoever wins `dispatch` drains the queue and nobody ever
/// waits on it. `pending` is the only lock taken under `state`, and it is never
/// held across another lock.
struct Stream<P> {
    state: Mutex<Slot<P>>,
    pending: Mutex<VecDeque<Vec<Event<P>>>>,
    dispatch: Mutex<()>,
}

impl<P> Stream<P> {
    fn new() -> Self {
        Self {
            state: Mutex::new(Slot::Unloaded),
            pending: Mutex::new(VecDeque::new()),
            dispatch: Mutex::new(()),
        }
    }

    fn enqueue(&self, events: Vec<Event<P>>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(events);
    }

    fn next_pending(&self) -> Option<Vec<Event<P>>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn has_pending(&self) -> bool {
        !self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Slot<P>>, EventStoreError> {
        self.state
            .lock()
            .map_err(|_| EventStoreError::Storage("stream lock poisoned".to_string()))
    }
}

/// Append-only ledger mapping aggregate id → history.
///
/// Create one per logical store and pass it (usually as an `Arc`) to every
/// caller; independent instances never share state unless they share a backend.
pub struct EventStore<P, B> {
    backend: B,
    streams: RwLock<HashMap<AggregateId, Arc<Stream<P>>>>,
    listeners: RwLock<Vec<Arc<dyn EventListener<P>>>>,
}

impl<P, B> core::fmt::Debug for EventStore<P, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStore")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl<P, B> EventStore<P, B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            streams: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Register a callback invoked after every successful append.
    pub fn register_listener(&self, listener: Arc<dyn EventListener<P>>) {
        debug!(listener = listener.name(), "registering event listener");
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn stream(&self, aggregate_id: &AggregateId) -> Result<Arc<Stream<P>>, EventStoreError> {
        {
            let streams = self
                .streams
                .read()
                .map_err(|_| EventStoreError::Storage("stream map lock poisoned".to_string()))?;
            if let Some(stream) = streams.get(aggregate_id) {
                return Ok(stream.clone());
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Storage("stream map lock poisoned".to_string()))?;
        Ok(streams
            .entry(aggregate_id.clone())
            .or_insert_with(|| Arc::new(Stream::new()))
            .clone())
    }

    /// Deliver queued batches of `stream` unless another thread already is.
    ///
    /// The queue is re-checked after `dispatch` is released: a batch queued
    /// while the previous drainer was finishing up would otherwise be stranded.
    fn drain(&self, aggregate_id: &AggregateId, stream: &Stream<P>) {
        loop {
            let guard = match stream.dispatch.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(events) = stream.next_pending() {
                self.notify(aggregate_id, &events);
            }
            drop(guard);
            if !stream.has_pending() {
                return;
            }
        }
    }

    fn notify(&self, aggregate_id: &AggregateId, events: &[Event<P>]) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            if let Err(err) = listener.on_committed(aggregate_id, events) {
                warn!(
                    listener = listener.name(),
                    aggregate_id = %aggregate_id,
                    error = %err,
                    "event listener failed; committed events stay recoverable through catch-up"
                );
            }
        }
    }
}

impl<P, B> EventStore<P, B>
where
    P: Clone + Send + Sync,
    B: EventStoreBackend<P>,
{
    /// Current history of an aggregate (`History::empty()` if never written).
    pub fn get_history(&self, aggregate_id: &AggregateId) -> Result<History<P>, EventStoreError> {
        let stream = self.stream(aggregate_id)?;
        let mut slot = stream.lock_state()?;
        Ok(self.ensure_loaded(aggregate_id, &mut slot)?.clone())
    }

    /// Atomically append a batch that starts at the aggregate's next expected id.
    ///
    /// On success returns the new authoritative history and notifies listeners
    /// with exactly `events`. On any error nothing is written and the stored
    /// history is unchanged. An empty batch returns the current history.
    ///
    /// Listeners run on whichever appending thread is draining the aggregate's
    /// queue, so a call may return before its own batch was delivered when
    /// another thread is mid-delivery. Listeners may read the store and append
    /// to it, including to the aggregate being delivered: such a batch is
    /// delivered after the current one returns.
    pub fn append(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<Event<P>>,
    ) -> Result<History<P>, EventStoreError> {
        validate_batch(aggregate_id, &events)?;

        let stream = self.stream(aggregate_id)?;
        let mut slot = stream.lock_state()?;
        let current = self.ensure_loaded(aggregate_id, &mut slot)?;

        let Some(found) = events.first().map(Event::event_id) else {
            return Ok(current.clone());
        };
        let expected = current.next_expected_id();
        if found != expected {
            warn!(aggregate_id = %aggregate_id, %expected, %found, "rejecting stale append");
            return Err(EventStoreError::Concurrency {
                aggregate_id: aggregate_id.clone(),
                expected,
                found,
            });
        }

        let next = current
            .append_all(events.iter().cloned())
            .map_err(|err| EventStoreError::InvalidAppend(err.to_string()))?;

        match self.backend.persist(aggregate_id, expected, &events) {
            Ok(PersistOutcome::Persisted) => {}
            Ok(PersistOutcome::Conflict { actual_next }) => {
                // Someone else wrote to the backend; re-read it on next access.
                *slot = Slot::Unloaded;
                warn!(aggregate_id = %aggregate_id, expected = %actual_next, %found, "backend reported a conflicting stream");
                return Err(EventStoreError::Concurrency {
                    aggregate_id: aggregate_id.clone(),
                    expected: actual_next,
                    found,
                });
            }
            Err(err) => {
                warn!(aggregate_id = %aggregate_id, error = %err, "backend failed to persist batch");
                return Err(err.into());
            }
        }

        *slot = Slot::Ready(next.clone());
        debug!(
            aggregate_id = %aggregate_id,
            first = %found,
            count = events.len(),
            next_expected = %next.next_expected_id(),
            "committed events"
        );

        stream.enqueue(events);
        drop(slot);
        self.drain(aggregate_id, &stream);

        Ok(next)
    }

    fn ensure_loaded<'s>(
        &self,
        aggregate_id: &AggregateId,
        slot: &'s mut Slot<P>,
    ) -> Result<&'s History<P>, EventStoreError> {
        if matches!(slot, Slot::Unloaded) {
            let events = self.backend.load_events(aggregate_id)?;
            *slot = match load_history(aggregate_id, events) {
                Ok(history) => {
                    debug!(aggregate_id = %aggregate_id, events = history.len(), "loaded stream");
                    Slot::Ready(history)
                }
                Err(reason) => {
                    error!(aggregate_id = %aggregate_id, %reason, "stored stream is corrupt; aggregate marked unusable");
                    Slot::Unusable(reason)
                }
            };
        }

        match &*slot {
            Slot::Ready(history) => Ok(history),
            Slot::Unusable(reason) => Err(EventStoreError::InvariantViolation {
                aggregate_id: aggregate_id.clone(),
                reason: reason.clone(),
            }),
            Slot::Unloaded => Err(EventStoreError::Storage(format!(
                "stream '{aggregate_id}' could not be loaded"
            ))),
        }
    }
}

fn load_history<P>(aggregate_id: &AggregateId, events: Vec<Event<P>>) -> Result<History<P>, String> {
    let history = History::from_events(events).map_err(|err| err.to_string())?;
    match history.aggregate_id() {
        Some(found) if found != aggregate_id => {
            Err(format!("backend returned events of '{found}'"))
        }
        _ => Ok(history),
    }
}

fn validate_batch<P>(aggregate_id: &AggregateId, events: &[Event<P>]) -> Result<(), EventStoreError> {
    for (idx, e) in events.iter().enumerate() {
        if e.aggregate_id() != aggregate_id {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains an event of '{}' at index {idx}",
                e.aggregate_id()
            )));
        }
    }
    for (idx, pair) in events.windows(2).enumerate() {
        if pair[1].event_id() != pair[0].event_id().next() {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch is not contiguous at index {}: {} follows {}",
                idx + 1,
                pair[1].event_id(),
                pair[0].event_id()
            )));
        }
    }
    Ok(())
}

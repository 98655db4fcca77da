use std::collections::HashMap;
use std::sync::RwLock;

use mailfold_core::{AggregateId, EventId};
use mailfold_events::Event;

use super::r#trait::{BackendError, EventStoreBackend, PersistOutcome};

/// In-memory append-only backend.
///
/// Intended for tests/dev. It outlives any number of `EventStore` instances
/// built on top of it (share it through an `Arc`), which is how tests simulate
/// a process restart.
#[derive(Debug)]
pub struct InMemoryBackend<P> {
    streams: RwLock<HashMap<AggregateId, Vec<Event<P>>>>,
}

impl<P> Default for InMemoryBackend<P> {
    fn default() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
        }
    }
}

impl<P> InMemoryBackend<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a stream with raw, unchecked events.
    ///
    /// Stands in for externally written or corrupted storage.
    pub fn with_raw_stream(self, aggregate_id: AggregateId, events: Vec<Event<P>>) -> Self {
        if let Ok(mut streams) = self.streams.write() {
            streams.insert(aggregate_id, events);
        }
        self
    }

    /// Number of events persisted for an aggregate.
    pub fn stream_len(&self, aggregate_id: &AggregateId) -> usize {
        self.streams
            .read()
            .map(|s| s.get(aggregate_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn next_id(stream: &[Event<P>]) -> EventId {
        stream
            .last()
            .map_or(EventId::first(), |e| e.event_id().next())
    }
}

impl<P> EventStoreBackend<P> for InMemoryBackend<P>
where
    P: Clone + Send + Sync,
{
    fn load_events(&self, aggregate_id: &AggregateId) -> Result<Vec<Event<P>>, BackendError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| BackendError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(aggregate_id).cloned().unwrap_or_default())
    }

    fn persist(
        &self,
        aggregate_id: &AggregateId,
        expected_next: EventId,
        events: &[Event<P>],
    ) -> Result<PersistOutcome, BackendError> {
        let mut streams = self
            .streams
            .write()
            .map_err(|_| BackendError::Unavailable("lock poisoned".to_string()))?;

        let stream = streams.entry(aggregate_id.clone()).or_default();
        let actual_next = Self::next_id(stream);
        if actual_next != expected_next {
            return Ok(PersistOutcome::Conflict { actual_next });
        }

        stream.extend(events.iter().cloned());
        Ok(PersistOutcome::Persisted)
    }
}

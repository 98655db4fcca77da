//! Reactor cursor persistence.
//!
//! A cursor records the last event id a reactor fully processed for one
//! aggregate. It enables:
//! - Idempotent reactions (deliveries at or before the cursor are skipped)
//! - Resume after crash (catch-up continues after the cursor)
//! - Deterministic rebuilds (clear cursors and replay from scratch)

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use mailfold_core::{AggregateId, EventId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CursorStoreError {
    /// Compare-and-set lost: the stored cursor is not the one the caller read.
    #[error("stale cursor for '{consumer}' on '{aggregate_id}': expected {expected:?}, found {found:?}")]
    Stale {
        consumer: String,
        aggregate_id: AggregateId,
        expected: Option<EventId>,
        found: Option<EventId>,
    },

    #[error("cursor storage error: {0}")]
    Storage(String),
}

/// Per-consumer, per-aggregate cursor store.
///
/// Cursors only move forward and only through `advance`, a compare-and-set
/// against the value the caller read.
pub trait CursorStore: Send + Sync {
    /// Last processed event id, `None` if the consumer never processed this aggregate.
    fn get(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<EventId>, CursorStoreError>;

    /// Move the cursor from `expected` to `to`.
    fn advance(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
        expected: Option<EventId>,
        to: EventId,
    ) -> Result<(), CursorStoreError>;

    /// Clear all cursors of a consumer (for rebuilds).
    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError>;
}

impl<C> CursorStore for std::sync::Arc<C>
where
    C: CursorStore + ?Sized,
{
    fn get(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<EventId>, CursorStoreError> {
        (**self).get(consumer, aggregate_id)
    }

    fn advance(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
        expected: Option<EventId>,
        to: EventId,
    ) -> Result<(), CursorStoreError> {
        (**self).advance(consumer, aggregate_id, expected, to)
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        (**self).clear(consumer)
    }
}

/// In-memory cursor store for tests/dev.
///
/// Survives the reactors and event stores built around it, which lets tests
/// model a restart by rebuilding everything except the storage.
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<(String, AggregateId), EventId>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CursorStore for InMemoryCursorStore {
    fn get(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
    ) -> Result<Option<EventId>, CursorStoreError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|_| CursorStoreError::Storage("lock poisoned".to_string()))?;
        Ok(cursors
            .get(&(consumer.to_string(), aggregate_id.clone()))
            .copied())
    }

    fn advance(
        &self,
        consumer: &str,
        aggregate_id: &AggregateId,
        expected: Option<EventId>,
        to: EventId,
    ) -> Result<(), CursorStoreError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| CursorStoreError::Storage("lock poisoned".to_string()))?;

        let key = (consumer.to_string(), aggregate_id.clone());
        let found = cursors.get(&key).copied();
        if found != expected || Some(to) <= found {
            return Err(CursorStoreError::Stale {
                consumer: consumer.to_string(),
                aggregate_id: aggregate_id.clone(),
                expected,
                found,
            });
        }

        cursors.insert(key, to);
        Ok(())
    }

    fn clear(&self, consumer: &str) -> Result<(), CursorStoreError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| CursorStoreError::Storage("lock poisoned".to_string()))?;
        cursors.retain(|(name, _), _| name != consumer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(key: &str) -> AggregateId {
        AggregateId::new(key).unwrap()
    }

    #[test]
    fn cursors_start_absent_and_advance_by_compare_and_set() {
        let store = InMemoryCursorStore::new();
        let id = agg("a");

        assert_eq!(store.get("mailer", &id).unwrap(), None);
        store.advance("mailer", &id, None, EventId::first()).unwrap();
        assert_eq!(store.get("mailer", &id).unwrap(), Some(EventId::first()));

        let err = store
            .advance("mailer", &id, None, EventId::first().next())
            .unwrap_err();
        assert!(matches!(err, CursorStoreError::Stale { found: Some(_), .. }));
    }

    #[test]
    fn cursors_never_move_backwards() {
        let store = InMemoryCursorStore::new();
        let id = agg("a");
        store
            .advance("mailer", &id, None, EventId::from_offset(3))
            .unwrap();

        let err = store
            .advance(
                "mailer",
                &id,
                Some(EventId::from_offset(3)),
                EventId::from_offset(2),
            )
            .unwrap_err();
        assert!(matches!(err, CursorStoreError::Stale { .. }));
    }

    #[test]
    fn cursors_are_scoped_per_consumer_and_aggregate() {
        let store = InMemoryCursorStore::new();
        store.advance("mailer", &agg("a"), None, EventId::first()).unwrap();

        assert_eq!(store.get("auditor", &agg("a")).unwrap(), None);
        assert_eq!(store.get("mailer", &agg("b")).unwrap(), None);

        store.advance("auditor", &agg("a"), None, EventId::first()).unwrap();
        store.clear("mailer").unwrap();
        assert_eq!(store.get("mailer", &agg("a")).unwrap(), None);
        assert_eq!(store.get("auditor", &agg("a")).unwrap(), Some(EventId::first()));
    }
}

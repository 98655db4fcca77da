//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::value_object::ValueObject;

/// Identifier of an aggregate (one consistency boundary, one history).
///
/// Aggregate keys are opaque, non-empty strings. Domain modules usually derive
/// them from a business key, e.g. `QuotaThresholdChangesHistoryId-alice@example.org`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AggregateId(String);

impl AggregateId {
    /// Build an identifier from a business key.
    pub fn new(key: impl Into<String>) -> Result<Self, DomainError> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(DomainError::invalid_id("AggregateId: key cannot be empty"));
        }
        Ok(Self(key))
    }

    /// Create a fresh identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn random() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_key(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for AggregateId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AggregateId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for AggregateId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AggregateId> for String {
    fn from(value: AggregateId) -> Self {
        value.0
    }
}

/// Position of an event within its aggregate's history.
///
/// `first()` is a fixed constant shared by every aggregate; each following
/// event takes `next()` of its predecessor. The counter is a `u64` and is
/// treated as never overflowing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(u64);

impl EventId {
    const FIRST: u64 = 0;

    /// The id of the first event of any aggregate.
    pub const fn first() -> Self {
        Self(Self::FIRST)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The preceding id, or `None` for `first()`.
    pub const fn previous(self) -> Option<Self> {
        if self.0 == Self::FIRST {
            None
        } else {
            Some(Self(self.0 - 1))
        }
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// Advance `first()` by `offset` positions.
    pub const fn from_offset(offset: u64) -> Self {
        Self(Self::FIRST + offset)
    }
}

impl core::fmt::Display for EventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl ValueObject for EventId {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn first_is_a_constant() {
        assert_eq!(EventId::first(), EventId::first());
    }

    #[test]
    fn previous_of_first_is_none() {
        assert_eq!(EventId::first().previous(), None);
    }

    #[test]
    fn next_is_greater_than_first() {
        assert!(EventId::first() < EventId::first().next());
        assert!(EventId::first().next() > EventId::first());
    }

    #[test]
    fn next_always_has_the_same_increment() {
        assert_eq!(EventId::first().next(), EventId::first().next());
    }

    #[test]
    fn previous_reverts_next() {
        assert_eq!(EventId::first().next().previous(), Some(EventId::first()));
    }

    #[test]
    fn previous_of_next_orders_before_next() {
        let next = EventId::first().next();
        let back = next.previous().unwrap();
        assert!(back < next);
        assert!(next > back);
    }

    #[test]
    fn aggregate_id_rejects_blank_keys() {
        assert!(matches!(AggregateId::new(""), Err(DomainError::InvalidId(_))));
        assert!(matches!("   ".parse::<AggregateId>(), Err(DomainError::InvalidId(_))));
    }

    #[test]
    fn aggregate_id_displays_its_key() {
        let id = AggregateId::new("mailbox-42").unwrap();
        assert_eq!(id.to_string(), "mailbox-42");
        assert_eq!(id.as_key(), "mailbox-42");
    }

    #[test]
    fn random_aggregate_ids_are_distinct() {
        assert_ne!(AggregateId::random(), AggregateId::random());
    }

    proptest! {
        #[test]
        fn next_then_previous_returns_to_first(n in 0u64..512) {
            let mut id = EventId::first();
            for _ in 0..n {
                id = id.next();
            }
            prop_assert_eq!(id, EventId::from_offset(n));
            for _ in 0..n {
                id = id.previous().unwrap();
            }
            prop_assert_eq!(id, EventId::first());
            prop_assert_eq!(id.previous(), None);
        }

        #[test]
        fn next_is_strictly_greater_and_reversible(raw in 0u64..u64::MAX) {
            let id = EventId::from_offset(raw);
            prop_assert!(id.next() > id);
            prop_assert_eq!(id.next().previous(), Some(id));
        }

        #[test]
        fn equality_and_hash_follow_the_ordinal(a in 0u64..1_000, b in 0u64..1_000) {
            let (x, y) = (EventId::from_offset(a), EventId::from_offset(b));
            prop_assert_eq!(x == y, a == b);
            prop_assert_eq!(x.cmp(&y), a.cmp(&b));
            if x == y {
                prop_assert_eq!(hash_of(&x), hash_of(&y));
            }
        }
    }
}

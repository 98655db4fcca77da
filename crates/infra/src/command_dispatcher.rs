//! Command execution pipeline (application-level orchestration).
//!
//! This module implements the **command dispatch pattern** for event-sourced aggregates.
//! It orchestrates the full lifecycle: reading the history, rehydrating state, handling
//! the command and appending the decided events.
//!
//! ## Command Execution Flow
//!
//! ```text
//! Command
//!   ↓
//! 1. Read the current history from the store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces payloads)
//!   ↓
//! 4. Number the payloads from the history's next expected id
//!   ↓
//! 5. Append to the store (optimistic concurrency check; listeners notified)
//! ```
//!
//! A concurrency failure means another writer committed between steps 1 and 5. The
//! dispatcher re-runs the whole pipeline up to `max_retries` times; with the default of
//! zero the failure is returned and the caller decides.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use mailfold_core::{Aggregate, AggregateId, DomainError, EventId};
use mailfold_events::{Command, Event, History, execute};

use crate::config::InfraConfig;
use crate::event_store::{EventStore, EventStoreBackend, EventStoreError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure: the history moved since it was read.
    #[error("concurrent modification of '{aggregate_id}': expected {expected}, found {found}")]
    Concurrency {
        aggregate_id: AggregateId,
        expected: EventId,
        found: EventId,
    },
    /// The store's backend failed; nothing was appended.
    #[error("storage error: {0}")]
    Storage(String),
    /// Stored history is corrupt, or the domain refused the command on invariant grounds.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    /// The decided batch was rejected as malformed.
    #[error("invalid append: {0}")]
    InvalidAppend(String),
    /// Domain validation failure (deterministic).
    #[error("validation failed: {0}")]
    Validation(String),
    /// The command conflicts with the aggregate's state (deterministic).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Domain-level not found.
    #[error("not found")]
    NotFound,
    /// Every attempt lost the optimistic concurrency race.
    #[error("gave up after {attempts} attempts lost to concurrent writers")]
    RetriesExhausted { attempts: u32 },
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency {
                aggregate_id,
                expected,
                found,
            } => DispatchError::Concurrency {
                aggregate_id,
                expected,
                found,
            },
            EventStoreError::Storage(msg) => DispatchError::Storage(msg),
            EventStoreError::InvariantViolation {
                aggregate_id,
                reason,
            } => DispatchError::InvariantViolation(format!("'{aggregate_id}': {reason}")),
            EventStoreError::InvalidAppend(msg) => DispatchError::InvalidAppend(msg),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// The dispatcher sits between callers and the [`EventStore`]: domain code stays pure
/// (`handle` only decides), the store stays the only place where writers are
/// reconciled. Several dispatchers may share one store.
#[derive(Debug)]
pub struct CommandDispatcher<P, B> {
    store: Arc<EventStore<P, B>>,
    config: InfraConfig,
}

impl<P, B> Clone for CommandDispatcher<P, B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config,
        }
    }
}

impl<P, B> CommandDispatcher<P, B> {
    pub fn new(store: Arc<EventStore<P, B>>, config: InfraConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<EventStore<P, B>> {
        &self.store
    }

    pub fn config(&self) -> InfraConfig {
        self.config
    }
}

impl<P, B> CommandDispatcher<P, B>
where
    P: Clone + Send + Sync,
    B: EventStoreBackend<P>,
{
    /// Append already-numbered candidate events (no retry).
    pub fn submit(
        &self,
        aggregate_id: &AggregateId,
        events: Vec<Event<P>>,
    ) -> Result<History<P>, DispatchError> {
        Ok(self.store.append(aggregate_id, events)?)
    }

    /// Dispatch a command through the full pipeline.
    ///
    /// `make_aggregate` builds a fresh, empty aggregate for `aggregate_id`; it is
    /// called once per attempt. Returns the history after the commit, or the current
    /// history when the command decided no events.
    pub fn dispatch<A>(
        &self,
        aggregate_id: &AggregateId,
        command: &A::Command,
        make_aggregate: impl Fn() -> A,
    ) -> Result<History<P>, DispatchError>
    where
        A: Aggregate<Event = P, Error = DomainError>,
    {
        let attempts = self.config.dispatch_max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let history = self.store.get_history(aggregate_id)?;
            let decided = execute(&history, command, &make_aggregate)?;
            if decided.is_empty() {
                debug!(aggregate_id = %aggregate_id, "command decided no events");
                return Ok(history);
            }

            match self.store.append(aggregate_id, decided) {
                Ok(next) => return Ok(next),
                Err(EventStoreError::Concurrency { expected, found, .. }) if attempt < attempts => {
                    warn!(
                        aggregate_id = %aggregate_id,
                        attempt,
                        %expected,
                        %found,
                        "lost optimistic concurrency race; retrying command"
                    );
                }
                Err(err @ EventStoreError::Concurrency { .. }) if attempts > 1 => {
                    warn!(aggregate_id = %aggregate_id, attempts, error = %err, "command retries exhausted");
                    return Err(DispatchError::RetriesExhausted { attempts });
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DispatchError::RetriesExhausted { attempts })
    }

    /// `dispatch` to the aggregate the command names.
    pub fn send<A>(
        &self,
        command: &A::Command,
        make_aggregate: impl Fn() -> A,
    ) -> Result<History<P>, DispatchError>
    where
        A: Aggregate<Event = P, Error = DomainError>,
        A::Command: Command,
    {
        let aggregate_id = command.target_aggregate_id()?;
        self.dispatch(&aggregate_id, command, make_aggregate)
    }
}

use mailfold_core::{AggregateId, DomainResult};

/// A command targets a specific aggregate (command abstraction).
///
/// Commands represent **intent**, a request to perform an action on an aggregate.
/// They are **transient** (not persisted) and are transformed into events (which
/// are persisted).
///
/// ## Aggregate Targeting
///
/// Commands name the aggregate they target via `target_aggregate_id()`. Each
/// command operates on one aggregate, which is also the conflict scope of the
/// event store: commands for different aggregates never contend. Deriving the
/// id may fail (e.g. a command naming a blank user).
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    fn target_aggregate_id(&self) -> DomainResult<AggregateId>;
}

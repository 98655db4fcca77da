use mailfold_core::AggregateId;

use crate::{DomainEvent, Event};

/// A downstream consumer that turns committed events into side effects.
///
/// Reactors implement the **reaction** half of event sourcing: after events are
/// committed, each reactor performs its effect (e.g. emitting an outbound
/// notification command). Events are delivered **at least once**, so the
/// infrastructure pairs every reactor with a per-aggregate cursor and only
/// calls `react` for events past that cursor.
///
/// ## Exactly-once effects
///
/// The runner treats "effect, then cursor advance" as one unit: if `react`
/// fails, the cursor stays put and the event is delivered again on the next
/// delivery or catch-up. `react` should therefore either complete its effect or
/// fail without a visible partial effect.
///
/// ## Naming
///
/// `name()` keys the reactor's cursors. It must be stable across restarts and
/// unique among reactors sharing a cursor store.
pub trait Reactor: Send + Sync {
    type Ev: DomainEvent;
    type Error: std::error::Error + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Perform the effect of a single committed event.
    fn react(&self, aggregate_id: &AggregateId, event: &Event<Self::Ev>)
        -> Result<(), Self::Error>;
}

impl<R> Reactor for std::sync::Arc<R>
where
    R: Reactor + ?Sized,
{
    type Ev = R::Ev;
    type Error = R::Error;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn react(&self, aggregate_id: &AggregateId, event: &Event<Self::Ev>)
        -> Result<(), Self::Error> {
        (**self).react(aggregate_id, event)
    }
}

use mailfold_core::AggregateId;
use mailfold_events::Event;

/// Callback invoked after every successful append.
///
/// The store calls `on_committed` with exactly the newly committed events, in
/// order, after leaving the aggregate's critical section. Notifications for
/// one aggregate arrive in commit order, one batch at a time, possibly on the
/// thread of a later append to the same aggregate.
///
/// A listener may read the store and may append to it, including to the
/// aggregate it is being notified for. Such an append commits immediately;
/// its batch is delivered after `on_committed` returns. Slow effects still
/// belong on a `ReactionWorker`, since they delay later notifications of the
/// aggregate.
///
/// Delivery is at-least-once from the point of view of a consumer that also
/// catches up after a restart, so listeners must be idempotent (see
/// `ReactionRunner`).
pub trait EventListener<P>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        core::any::type_name::<Self>()
    }

    fn on_committed(&self, aggregate_id: &AggregateId, events: &[Event<P>]) -> anyhow::Result<()>;
}

impl<P, F> EventListener<P> for F
where
    F: Fn(&AggregateId, &[Event<P>]) -> anyhow::Result<()> + Send + Sync,
{
    fn on_committed(&self, aggregate_id: &AggregateId, events: &[Event<P>]) -> anyhow::Result<()> {
        self(aggregate_id, events)
    }
}

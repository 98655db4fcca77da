use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use mailfold_core::AggregateId;
use mailfold_events::{Event, Reactor};

use super::{CursorStore, ReactionError, ReactionRunner};
use crate::event_store::{EventListener, EventStore, EventStoreBackend};

/// Events committed by one successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch<P> {
    pub aggregate_id: AggregateId,
    pub events: Vec<Event<P>>,
}

/// Listener that only enqueues committed batches for a `ReactionWorker`.
///
/// Keeps the commit path short: the effect runs on the worker thread.
#[derive(Debug)]
pub struct QueuedListener<P> {
    name: &'static str,
    sender: mpsc::Sender<CommittedBatch<P>>,
}

impl<P> EventListener<P> for QueuedListener<P>
where
    P: Clone + Send,
{
    fn name(&self) -> &str {
        self.name
    }

    fn on_committed(&self, aggregate_id: &AggregateId, events: &[Event<P>]) -> anyhow::Result<()> {
        self.sender
            .send(CommittedBatch {
                aggregate_id: aggregate_id.clone(),
                events: events.to_vec(),
            })
            .map_err(|_| anyhow::anyhow!("reaction worker '{}' has stopped", self.name))
    }
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// Batches already queued are processed before the worker exits.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Dropping the handle shuts the worker down as `shutdown` does, releasing the
/// store it holds.
impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Background reaction loop.
///
/// - Receives committed batches from its `QueuedListener`
/// - Delivers them through a `ReactionRunner` (cursor discipline)
/// - Falls back to a catch-up from the store when a delivery finds the
///   consumer behind (e.g. after an earlier failed effect)
/// - Supports graceful shutdown, also when its `WorkerHandle` is dropped
///
/// The thread owns an `Arc` of the store, and the store owns the worker's
/// listener; stopping the worker is what breaks that cycle.
#[derive(Debug)]
pub struct ReactionWorker;

impl ReactionWorker {
    /// Spawn a worker thread; register the returned listener with `store`.
    pub fn spawn<R, C, B>(
        name: &'static str,
        runner: Arc<ReactionRunner<R, C>>,
        store: Arc<EventStore<R::Ev, B>>,
        tick: Duration,
    ) -> std::io::Result<(QueuedListener<R::Ev>, WorkerHandle)>
    where
        R: Reactor + 'static,
        C: CursorStore + 'static,
        B: EventStoreBackend<R::Ev> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (batch_tx, batch_rx) = mpsc::channel::<CommittedBatch<R::Ev>>();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, &runner, &store, batch_rx, shutdown_rx, tick))?;

        info!(worker = name, "reaction worker started");
        Ok((
            QueuedListener {
                name,
                sender: batch_tx,
            },
            WorkerHandle {
                shutdown: shutdown_tx,
                join: Some(join),
            },
        ))
    }
}

fn worker_loop<R, C, B>(
    name: &'static str,
    runner: &ReactionRunner<R, C>,
    store: &EventStore<R::Ev, B>,
    batches: mpsc::Receiver<CommittedBatch<R::Ev>>,
    shutdown_rx: mpsc::Receiver<()>,
    tick: Duration,
) where
    R: Reactor,
    C: CursorStore,
    B: EventStoreBackend<R::Ev>,
{
    loop {
        // Shutdown check (non-blocking); a dropped handle counts as a request.
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                while let Ok(batch) = batches.try_recv() {
                    process(name, runner, store, batch);
                }
                break;
            }
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match batches.recv_timeout(tick) {
            Ok(batch) => process(name, runner, store, batch),
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    info!(worker = name, "reaction worker stopped");
}

fn process<R, C, B>(
    name: &'static str,
    runner: &ReactionRunner<R, C>,
    store: &EventStore<R::Ev, B>,
    batch: CommittedBatch<R::Ev>,
) where
    R: Reactor,
    C: CursorStore,
    B: EventStoreBackend<R::Ev>,
{
    let aggregate_id = &batch.aggregate_id;
    let outcome = match runner.deliver(aggregate_id, &batch.events) {
        Err(ReactionError::Behind { .. }) => {
            debug!(worker = name, aggregate_id = %aggregate_id, "consumer behind; catching up from the store");
            runner.catch_up(store, aggregate_id)
        }
        other => other,
    };

    if let Err(err) = outcome {
        warn!(worker = name, aggregate_id = %aggregate_id, error = %err, "reaction failed; will retry on next delivery or catch-up");
    }
}

// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use tracing::{debug, info, warn};

use crate::dag::{ScheduledItem, Scheduler};
use crate::store::Outcome;
use crate::types::{ItemId, RunStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these items to the executor backend.
    DispatchBatch(Vec<ScheduledItem>),
    /// The run is over.
    RequestExit(RunStatus),
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn idle() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: true,
        }
    }

    fn exit(status: RunStatus) -> Self {
        Self {
            commands: vec![CoreCommand::RequestExit(status)],
            keep_running: false,
        }
    }
}

/// Start the run: activate the initial frontier and dispatch.
pub fn handle_run_requested(scheduler: &mut Scheduler, limit: usize) -> CoreStep {
    scheduler.start();
    dispatch_or_finish(scheduler, limit)
}

/// Handle an item's reported outcome.
///
/// Reports for an attempt other than the current one are stale and
/// ignored. Once cancelled, nothing new is dispatched; the run ends when the
/// last in-flight item has reported.
pub fn handle_item_finished(
    scheduler: &mut Scheduler,
    cancelled: bool,
    limit: usize,
    item: ItemId,
    attempt: u32,
    outcome: Outcome,
) -> CoreStep {
    let current = scheduler.store().attempt(&item);
    if current != attempt {
        warn!(item = %item, attempt, current, "stale completion report; ignoring");
        return CoreStep::idle();
    }

    let step = scheduler.complete(&item, outcome);
    debug!(
        item = %item,
        activated = ?step.activated,
        failed = ?step.newly_failed,
        "item finished"
    );

    if cancelled {
        return drain_or_exit(scheduler);
    }

    dispatch_or_finish(scheduler, limit)
}

/// Handle cancellation (external request or deadline).
pub fn handle_cancel(scheduler: &Scheduler) -> CoreStep {
    info!(
        in_flight = scheduler.in_flight_count(),
        "cancellation requested; no further items will be dispatched"
    );
    drain_or_exit(scheduler)
}

fn drain_or_exit(scheduler: &Scheduler) -> CoreStep {
    if scheduler.in_flight_count() == 0 {
        CoreStep::exit(RunStatus::Cancelled)
    } else {
        CoreStep::idle()
    }
}

/// Join, then dispatch the next batch or finish.
///
/// While any item of the current batch is in flight nothing is dispatched.
fn dispatch_or_finish(scheduler: &mut Scheduler, limit: usize) -> CoreStep {
    if scheduler.in_flight_count() > 0 {
        return CoreStep::idle();
    }

    let batch = scheduler.dispatch_batch(limit);
    if batch.is_empty() {
        return CoreStep::exit(RunStatus::Finished);
    }

    CoreStep {
        commands: vec![CoreCommand::DispatchBatch(batch)],
        keep_running: true,
    }
}

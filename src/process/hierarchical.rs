// src/process/hierarchical.rs

//! Hierarchical topology: one item at a time, chosen by the manager.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::{ManagerSpec, ProcessGraph, Scheduler};
use crate::exec::{Roster, execute_item};
use crate::process::manager::Manager;
use crate::types::RunStatus;

/// Drive `scheduler` until nothing is runnable or the run is cancelled.
///
/// Each round asks the manager for an item and a worker, then runs that item
/// through the guard. After cancellation the running item gets `grace` to
/// report back before it is abandoned.
pub(crate) async fn drive(
    mut scheduler: Scheduler,
    graph: &ProcessGraph,
    roster: &Roster,
    spec: &ManagerSpec,
    cancel: &CancellationToken,
    grace: Duration,
) -> (Scheduler, RunStatus) {
    scheduler.start();

    let manager = Manager::new(spec, graph, roster);
    let mut round = 0u32;

    loop {
        if cancel.is_cancelled() {
            info!("hierarchical run cancelled");
            return (scheduler, RunStatus::Cancelled);
        }

        let runnable = scheduler.runnable_ids();
        if runnable.is_empty() {
            break;
        }

        round += 1;
        let Some(choice) = manager
            .choose(&runnable, scheduler.store(), round, cancel)
            .await
        else {
            break;
        };

        if cancel.is_cancelled() {
            info!("hierarchical run cancelled while the manager was choosing");
            return (scheduler, RunStatus::Cancelled);
        }

        let Some(item) = scheduler.begin(&choice.item, Some(choice.worker)) else {
            warn!(item = %choice.item, "manager choice could not be started; stopping");
            break;
        };

        let outcome = tokio::select! {
            outcome = execute_item(roster, &item, cancel) => outcome,
            _ = grace_expired(cancel, grace) => {
                warn!(item = %item.id, "cancellation grace period expired; abandoning item");
                scheduler.abandon(&item.id);
                return (scheduler, RunStatus::Cancelled);
            }
        };

        scheduler.complete(&item.id, outcome);
    }

    let status = if cancel.is_cancelled() {
        RunStatus::Cancelled
    } else {
        RunStatus::Finished
    };
    (scheduler, status)
}

async fn grace_expired(cancel: &CancellationToken, grace: Duration) {
    cancel.cancelled().await;
    tokio::time::sleep(grace).await;
}

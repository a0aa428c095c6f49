// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledItem`s to the executor backend
//! - watching the cancellation token and the grace period
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels or workers.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{
    CoreStep, handle_cancel, handle_item_finished, handle_run_requested,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::types::{RunStatus, Topology};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
    limit: usize,
    cancelled: bool,
}

impl CoreRuntime {
    /// Sequential graphs always run with a batch limit of one.
    pub fn new(scheduler: Scheduler, options: RuntimeOptions) -> Self {
        let limit = match scheduler.graph().topology() {
            Topology::Sequential | Topology::Hierarchical => 1,
            Topology::WorkflowGraph => options.max_concurrency.max(1),
        };
        Self {
            scheduler,
            limit,
            cancelled: false,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    pub fn run_status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Finished
        }
    }

    /// Fail every in-flight item with `ItemError::Cancelled`.
    pub fn abandon_in_flight(&mut self) {
        let ids: Vec<_> = self.scheduler.in_flight().cloned().collect();
        for id in ids {
            self.scheduler.abandon(&id);
        }
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::RunRequested => handle_run_requested(&mut self.scheduler, self.limit),
            RuntimeEvent::ItemFinished {
                item,
                attempt,
                outcome,
            } => handle_item_finished(
                &mut self.scheduler,
                self.cancelled,
                self.limit,
                item,
                attempt,
                outcome,
            ),
            RuntimeEvent::CancelRequested => {
                self.cancelled = true;
                handle_cancel(&self.scheduler)
            }
        }
    }
}

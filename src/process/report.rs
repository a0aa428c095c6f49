// src/process/report.rs

use serde::Serialize;

use crate::dag::{ItemFailure, Scheduler};
use crate::errors::{FlowdagError, Result};
use crate::store::{Outcome, ResultStore};
use crate::types::{ItemId, ItemStatus, RunStatus, Topology};

/// An activated item that never ran because a dependency failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedItem {
    pub item: ItemId,
    pub blocked_by: Option<ItemId>,
}

/// Everything a run produced.
///
/// `errors` lists failures in the order they were recorded, one entry per
/// failed attempt.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub topology: Topology,
    pub status: RunStatus,
    pub results: ResultStore,
    pub errors: Vec<ItemFailure>,
    pub blocked: Vec<BlockedItem>,
    /// Item ids in the order their attempts began.
    pub execution_order: Vec<ItemId>,
}

impl RunReport {
    pub(crate) fn from_scheduler(scheduler: Scheduler, status: RunStatus) -> Self {
        let topology = scheduler.graph().topology();
        let blocked = scheduler
            .blocked()
            .into_iter()
            .map(|(item, blocked_by)| BlockedItem { item, blocked_by })
            .collect();
        let (results, errors, execution_order) = scheduler.into_parts();

        Self {
            topology,
            status,
            results,
            errors,
            blocked,
            execution_order,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        self.results.status(id)
    }

    pub fn completed_count(&self) -> usize {
        self.results.count_with_status(ItemStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.results.count_with_status(ItemStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    /// Latest outcome of `id`, if it ever finished an attempt.
    pub fn outcome(&self, id: &str) -> Option<&Outcome> {
        self.results.latest(id)
    }

    /// Raw text of `id`'s latest successful outcome.
    pub fn output(&self, id: &str) -> Option<&str> {
        self.outcome(id)
            .filter(|o| o.is_success())
            .map(|o| o.raw_text.as_str())
    }

    /// Number of attempts `id` started.
    pub fn attempts(&self, id: &str) -> u32 {
        self.results.attempt(id)
    }

    /// Turn a cancelled report into `FlowdagError::Cancelled`.
    pub fn ensure_finished(self) -> Result<Self> {
        if self.is_cancelled() {
            return Err(FlowdagError::Cancelled(Box::new(self)));
        }
        Ok(self)
    }
}

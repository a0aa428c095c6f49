// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use serde::Serialize;

use crate::context::AggregatedInput;
use crate::dag::work_item::{OutputSchema, RetryPolicy};
use crate::errors::ItemError;
use crate::types::ItemId;

/// An item that has been moved to `InProgress` and is ready to hand to a
/// worker.
#[derive(Debug, Clone)]
pub struct ScheduledItem {
    pub id: ItemId,
    pub name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Worker that should run the item, if one could be resolved.
    pub worker: Option<String>,
    pub guardrail: Option<String>,
    pub tools: Vec<String>,
    pub retry: RetryPolicy,
    pub schema: OutputSchema,
    pub input: AggregatedInput,
}

/// A failure recorded during the run, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: ItemId,
    pub attempt: u32,
    pub error: ItemError,
}

/// Structured result of a single scheduler "step".
///
/// Useful for tests that want to manually step the graph and make
/// assertions about what changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Items that were activated (or reopened) as a result of this step.
    pub activated: Vec<ItemId>,
    /// Items that were newly marked as failed in this step.
    pub newly_failed: Vec<ItemId>,
    /// Whether nothing is runnable and nothing is in flight anymore.
    pub run_just_finished: bool,
}

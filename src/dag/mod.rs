// src/dag/mod.rs

//! Work item registry and scheduling.
//!
//! - [`work_item`] declares work items, condition tables and retry policies.
//! - [`graph`] holds the validated, immutable registry plus process settings.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   items are runnable, how they are batched and what a finished item
//!   activates next.
//! - [`scheduler_step`] defines the result types for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod work_item;

pub use graph::{ManagerSpec, ProcessGraph, ProcessGraphBuilder, ProcessSettings};
pub use scheduler::Scheduler;
pub use scheduler_step::{ItemFailure, ScheduledItem, SchedulerStep};
pub use work_item::{
    Branch, BranchSelection, ConditionTable, FieldKind, ItemKind, OutputSchema, RetryPolicy,
    TypedSchema, WorkItem,
};

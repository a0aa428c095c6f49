// src/types.rs

//! Small enums shared by the config layer, the scheduler and the reports.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical work item identifier used throughout the engine.
pub type ItemId = String;

/// Boxed, sendable future returned by the pluggable boundaries (workers,
/// validators, tools, retrievers, executor backends).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How the process graph is traversed.
///
/// - `Sequential`: declaration order, one item at a time, no branching.
/// - `Hierarchical`: a manager worker picks the next item and its worker.
/// - `WorkflowGraph`: entry points first, then successors and condition
///   tables, with bounded concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    #[default]
    Sequential,
    Hierarchical,
    WorkflowGraph,
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sequential" => Ok(Topology::Sequential),
            "hierarchical" => Ok(Topology::Hierarchical),
            "workflow_graph" | "graph" => Ok(Topology::WorkflowGraph),
            other => Err(format!(
                "invalid topology: {other} (expected \"sequential\", \"hierarchical\" or \"workflow_graph\")"
            )),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topology::Sequential => "sequential",
            Topology::Hierarchical => "hierarchical",
            Topology::WorkflowGraph => "workflow_graph",
        };
        f.write_str(s)
    }
}

/// Status of a work item within its current attempt.
///
/// Transitions only move forward (`NotStarted -> InProgress -> Completed |
/// Failed`). A loop re-entry opens a new attempt, which starts again at
/// `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::NotStarted => "not_started",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Whether an item may share a dispatch batch with its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrencyHint {
    /// Runs alone in its batch.
    #[default]
    Sync,
    /// May be dispatched together with other runnable `Async` items.
    Async,
}

/// How the raw executor output ended up being interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsedFormat {
    #[default]
    Raw,
    Json,
    Typed,
}

/// Terminal status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The runnable frontier drained.
    Finished,
    /// Cancellation or the run deadline stopped the run early.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Finished => f.write_str("finished"),
            RunStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

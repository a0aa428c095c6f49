// src/process/mod.rs

//! Process Controller: runs a [`ProcessGraph`] under its topology.
//!
//! - `Sequential` and `WorkflowGraph` go through the event-driven engine
//!   (`engine::Runtime` around `engine::CoreRuntime`) with a
//!   [`PooledBackend`].
//! - `Hierarchical` is driven round by round in [`hierarchical`], with the
//!   [`manager`] picking each item and worker.
//!
//! Every run ends in a [`RunReport`].

pub mod hierarchical;
pub mod manager;
pub mod report;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dag::{ProcessGraph, Scheduler};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::{FlowdagError, Result};
use crate::exec::{PooledBackend, Roster};
use crate::types::Topology;

pub use manager::{Choice, Manager};
pub use report::{BlockedItem, RunReport};

/// Per-run knobs. Everything left unset falls back to the graph settings.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Template variables layered over the graph's own `vars`.
    pub vars: BTreeMap<String, String>,
    /// Cancelling this token cancels the run.
    pub cancel: CancellationToken,
    pub deadline: Option<Duration>,
    pub max_concurrency: Option<usize>,
}

impl RunOptions {
    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }
}

/// A validated graph bound to the collaborators that execute it.
#[derive(Debug, Clone)]
pub struct Process {
    graph: Arc<ProcessGraph>,
    roster: Arc<Roster>,
}

impl Process {
    /// Bind `graph` to `roster`, checking that every name the graph uses
    /// resolves.
    pub fn new(graph: ProcessGraph, roster: Roster) -> Result<Self> {
        check_bindings(&graph, &roster)?;
        Ok(Self {
            graph: Arc::new(graph),
            roster: Arc::new(roster),
        })
    }

    pub fn graph(&self) -> &ProcessGraph {
        &self.graph
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Run with default options.
    pub async fn kickoff(&self) -> Result<RunReport> {
        self.run(RunOptions::default()).await
    }

    /// Run the graph to completion or cancellation.
    ///
    /// Item failures are recorded in the report; cancellation yields a
    /// report with `RunStatus::Cancelled`.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let settings = self.graph.settings();
        let cancel = options.cancel.child_token();
        let deadline = options.deadline.or(settings.deadline);
        let max_concurrency = options
            .max_concurrency
            .unwrap_or(settings.max_concurrency)
            .max(1);
        let grace = settings.cancel_grace;

        let deadline_task = deadline.map(|limit| spawn_deadline(cancel.clone(), limit));

        info!(
            topology = %settings.topology,
            items = self.graph.len(),
            max_concurrency,
            ?deadline,
            "starting run"
        );

        let scheduler = Scheduler::new(Arc::clone(&self.graph)).with_vars(options.vars);

        let (scheduler, status) = match settings.topology {
            Topology::Hierarchical => {
                let spec = settings.manager.as_ref().ok_or_else(|| {
                    FlowdagError::config("hierarchical topology requires a manager")
                })?;
                hierarchical::drive(scheduler, &self.graph, &self.roster, spec, &cancel, grace)
                    .await
            }
            Topology::Sequential | Topology::WorkflowGraph => {
                let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
                let backend =
                    PooledBackend::new(Arc::clone(&self.roster), tx, max_concurrency, cancel.clone());
                let core = CoreRuntime::new(
                    scheduler,
                    RuntimeOptions {
                        max_concurrency,
                        cancel_grace: grace,
                    },
                );
                let core = Runtime::new(core, rx, backend, cancel.clone(), grace)
                    .run()
                    .await?;
                let status = core.run_status();
                (core.into_scheduler(), status)
            }
        };

        if let Some(handle) = deadline_task {
            handle.abort();
        }

        let report = RunReport::from_scheduler(scheduler, status);
        info!(
            status = %report.status,
            completed = report.completed_count(),
            failed = report.failed_count(),
            "run finished"
        );
        Ok(report)
    }
}

fn spawn_deadline(cancel: CancellationToken, limit: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                warn!(?limit, "run deadline reached; cancelling");
                cancel.cancel();
            }
        }
    })
}

/// Every worker, guardrail and tool an item names must be registered.
///
/// In the hierarchical topology items may leave their worker to the
/// manager, but the manager must exist and cannot itself be assigned items.
fn check_bindings(graph: &ProcessGraph, roster: &Roster) -> Result<()> {
    let settings = graph.settings();
    let hierarchical = settings.topology == Topology::Hierarchical;

    let manager = match settings.manager {
        Some(ref spec) if hierarchical => {
            if !roster.has_worker(&spec.worker) {
                return Err(FlowdagError::config(format!(
                    "manager worker '{}' is not registered",
                    spec.worker
                )));
            }
            if !roster.worker_names().any(|w| w != spec.worker) {
                return Err(FlowdagError::config(
                    "hierarchical topology needs at least one worker besides the manager",
                ));
            }
            Some(spec.worker.as_str())
        }
        _ => None,
    };

    for item in graph.items() {
        match graph.worker_for(item) {
            Some(worker) if Some(worker) == manager => {
                return Err(FlowdagError::config(format!(
                    "item '{}' is assigned to the manager '{worker}'",
                    item.id
                )));
            }
            Some(worker) if !roster.has_worker(worker) => {
                return Err(FlowdagError::config(format!(
                    "item '{}' uses unknown worker '{worker}'",
                    item.id
                )));
            }
            Some(_) => {}
            None if hierarchical => {}
            None => {
                return Err(FlowdagError::config(format!(
                    "item '{}' has no worker and no default worker is set",
                    item.id
                )));
            }
        }

        if let Some(ref guardrail) = item.guardrail {
            if !roster.has_validator(guardrail) {
                return Err(FlowdagError::config(format!(
                    "item '{}' uses unknown guardrail '{guardrail}'",
                    item.id
                )));
            }
        }

        if let Some(tool) = item.tools.iter().find(|t| !roster.tools().contains(t)) {
            return Err(FlowdagError::config(format!(
                "item '{}' uses unknown tool '{tool}'",
                item.id
            )));
        }
    }

    Ok(())
}

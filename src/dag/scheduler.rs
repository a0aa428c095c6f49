// src/dag/scheduler.rs

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::ContextBuilder;
use crate::dag::graph::ProcessGraph;
use crate::dag::scheduler_step::{ItemFailure, ScheduledItem, SchedulerStep};
use crate::dag::state_manager::{Activation, ReadOnlyStateManager, Route, StateManager};
use crate::dag::work_item::{BranchSelection, ItemKind, WorkItem};
use crate::errors::ItemError;
use crate::store::{Outcome, ResultStore};
use crate::types::{ConcurrencyHint, ItemId, ItemStatus, Topology};

/// Scheduler holds the immutable graph plus the mutable per-run state.
///
/// It is responsible for:
/// - activating items according to the topology
/// - deciding which activated items are runnable and how they are batched
/// - building each attempt's input from the result store
/// - recording outcomes and resolving successors, branches and loops
///
/// It is the single owner of the [`ResultStore`].
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<ProcessGraph>,
    store: ResultStore,
    activated: HashSet<ItemId>,
    /// Output of the previous attempt, for items that were reopened.
    loop_state: HashMap<ItemId, String>,
    vars: BTreeMap<String, String>,
    in_flight: BTreeSet<ItemId>,
    errors: Vec<ItemFailure>,
    execution_order: Vec<ItemId>,
    started: bool,
}

impl Scheduler {
    pub fn new(graph: Arc<ProcessGraph>) -> Self {
        let store = ResultStore::new(graph.items().iter().map(|i| &i.id));
        let vars = graph.vars().clone();
        Self {
            graph,
            store,
            activated: HashSet::new(),
            loop_state: HashMap::new(),
            vars,
            in_flight: BTreeSet::new(),
            errors: Vec::new(),
            execution_order: Vec::new(),
            started: false,
        }
    }

    /// Overlay run variables on the graph's own `vars`.
    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars.extend(vars);
        self
    }

    pub fn graph(&self) -> &ProcessGraph {
        &self.graph
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn errors(&self) -> &[ItemFailure] {
        &self.errors
    }

    /// Item ids in the order their attempts began.
    pub fn execution_order(&self) -> &[ItemId] {
        &self.execution_order
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &ItemId> {
        self.in_flight.iter()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn status_of(&self, id: &str) -> Option<ItemStatus> {
        self.store.status(id)
    }

    /// Activate the initial frontier.
    ///
    /// Sequential and hierarchical runs activate every item; workflow graphs
    /// activate their entry points. Calling this twice is a no-op.
    pub fn start(&mut self) -> Vec<ItemId> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let graph = Arc::clone(&self.graph);
        let initial: Vec<&WorkItem> = match graph.topology() {
            Topology::Sequential | Topology::Hierarchical => graph.items().iter().collect(),
            Topology::WorkflowGraph => graph.entry_points().collect(),
        };

        let mut activated = Vec::new();
        let mut mgr = self.state_manager();
        for item in initial {
            if mgr.activate(&item.id, Route::Forward) == Activation::Activated {
                activated.push(item.id.clone());
            }
        }

        info!(
            topology = %graph.topology(),
            items = graph.len(),
            activated = activated.len(),
            "scheduler: run started"
        );
        activated
    }

    /// Runnable item ids in declaration order.
    pub fn runnable_ids(&self) -> Vec<ItemId> {
        self.read_only()
            .runnable()
            .into_iter()
            .map(|item| item.id.clone())
            .collect()
    }

    /// Choose the next batch.
    ///
    /// If the first runnable item is `Sync`, or `limit <= 1`, the batch is
    /// that item alone. Otherwise it is every runnable `Async` item, in
    /// declaration order, up to `limit`.
    pub fn next_batch(&self, limit: usize) -> Vec<ItemId> {
        let ro = self.read_only();
        let runnable = ro.runnable();

        let Some(first) = runnable.first() else {
            return Vec::new();
        };

        if first.concurrency == ConcurrencyHint::Sync || limit <= 1 {
            return vec![first.id.clone()];
        }

        runnable
            .iter()
            .filter(|item| item.concurrency == ConcurrencyHint::Async)
            .take(limit)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Begin a new attempt of `id` and assemble its input.
    ///
    /// `worker` overrides the item's own assignment (used by the
    /// hierarchical manager). Returns `None` if the item is not runnable.
    pub fn begin(&mut self, id: &str, worker: Option<String>) -> Option<ScheduledItem> {
        let graph = Arc::clone(&self.graph);
        let item = graph.get(id)?;

        if !self.read_only().is_runnable(item) {
            warn!(item = %id, "begin requested for an item that is not runnable; ignoring");
            return None;
        }

        let attempt = self.store.begin_attempt(id)?;
        self.in_flight.insert(item.id.clone());
        self.execution_order.push(item.id.clone());

        let loop_state = self.loop_state.get(id).cloned();
        let input = ContextBuilder::new(&self.vars).build(item, &self.store, loop_state);
        let worker = worker.or_else(|| graph.worker_for(item).map(str::to_string));

        info!(
            item = %item.id,
            attempt,
            worker = worker.as_deref().unwrap_or("-"),
            "scheduling item"
        );

        Some(ScheduledItem {
            id: item.id.clone(),
            name: item.name.clone(),
            attempt,
            worker,
            guardrail: item.guardrail.clone(),
            tools: item.tools.clone(),
            retry: item.retry.clone(),
            schema: item.output_schema.clone(),
            input,
        })
    }

    /// Select the next batch and begin every item in it.
    pub fn dispatch_batch(&mut self, limit: usize) -> Vec<ScheduledItem> {
        self.next_batch(limit)
            .into_iter()
            .filter_map(|id| self.begin(&id, None))
            .collect()
    }

    /// Record the outcome of an in-flight item and resolve what runs next.
    pub fn complete(&mut self, id: &str, outcome: Outcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        if !self.in_flight.remove(id) {
            warn!(item = %id, "completion for an item that is not in flight; ignoring");
            return step;
        }

        let graph = Arc::clone(&self.graph);
        let Some(item) = graph.get(id) else {
            warn!(item = %id, "completion for unknown item; ignoring");
            return step;
        };

        let attempt = self.store.attempt(id);
        let error = outcome.error.clone();
        self.store.finish_attempt(id, outcome);

        match error {
            None => debug!(item = %id, attempt, "item completed"),
            Some(err) => {
                warn!(item = %id, attempt, error = %err, "item failed");
                self.record_failure(id, attempt, err, &mut step);
            }
        }

        if graph.topology() == Topology::WorkflowGraph {
            self.route(item, attempt, &mut step);
        }

        step.run_just_finished = self.is_finished();
        if step.run_just_finished {
            info!("scheduler: nothing runnable and nothing in flight; run finished");
        }
        step
    }

    /// Give up on an in-flight item (cancellation grace expired).
    pub fn abandon(&mut self, id: &str) {
        if !self.in_flight.remove(id) {
            return;
        }
        let attempt = self.store.attempt(id);
        warn!(item = %id, attempt, "abandoning in-flight item");
        self.store.finish_attempt(id, Outcome::failure(ItemError::Cancelled));
        self.errors.push(ItemFailure {
            item: id.to_string(),
            attempt,
            error: ItemError::Cancelled,
        });
    }

    /// Nothing runnable and nothing in flight.
    pub fn is_finished(&self) -> bool {
        self.in_flight.is_empty() && self.read_only().runnable().is_empty()
    }

    /// Activated items that can no longer run, with their first
    /// unsatisfied dependency.
    pub fn blocked(&self) -> Vec<(ItemId, Option<ItemId>)> {
        self.read_only()
            .blocked()
            .into_iter()
            .map(|(item, dep)| (item.id.clone(), dep.cloned()))
            .collect()
    }

    pub fn into_parts(self) -> (ResultStore, Vec<ItemFailure>, Vec<ItemId>) {
        (self.store, self.errors, self.execution_order)
    }

    fn route(&mut self, item: &WorkItem, attempt: u32, step: &mut SchedulerStep) {
        // Successor edges only re-run finished items when the source itself
        // is on a repeat pass; a first pass never reopens anything.
        let successor_route = if attempt > 1 {
            Route::Reenter
        } else {
            Route::Forward
        };

        if self.store.status(&item.id) == Some(ItemStatus::Completed) {
            match item.kind {
                ItemKind::Plain => {
                    for next in item.successors.iter() {
                        self.activate_into(item, next, successor_route, step);
                    }
                }
                ItemKind::Decision(ref table) | ItemKind::Loop(ref table) => {
                    let classification = self
                        .store
                        .latest(&item.id)
                        .map(|o| o.raw_text.clone())
                        .unwrap_or_default();

                    match table.resolve(&classification) {
                        BranchSelection::Next(ids) => {
                            debug!(
                                item = %item.id,
                                classification = %classification.trim(),
                                next = ?ids,
                                "branch selected"
                            );
                            // A loop resolves its own repetition first; when
                            // that fails, the other targets are not activated.
                            let repeats = ids.iter().any(|id| id == &item.id);
                            if repeats {
                                self.activate_into(item, &item.id, Route::Reenter, step);
                            }
                            if self.store.status(&item.id) != Some(ItemStatus::Failed) {
                                for next in ids.iter().filter(|id| *id != &item.id) {
                                    self.activate_into(item, next, Route::Reenter, step);
                                }
                            }
                        }
                        BranchSelection::Terminate => {
                            debug!(item = %item.id, "branch terminates here");
                        }
                        BranchSelection::Unmatched { classification } => {
                            let err = ItemError::BranchResolution {
                                classification,
                                expected: table.keys(),
                            };
                            warn!(item = %item.id, error = %err, "branch resolution failed");
                            self.store.fail_latest(&item.id, err.clone());
                            self.record_failure(&item.id, attempt, err, step);
                        }
                    }
                }
            }
        }

        if self.store.status(&item.id) == Some(ItemStatus::Failed) && item.retry.skip_on_failure {
            debug!(item = %item.id, "failed item skips to its successors");
            for next in item.successors.iter() {
                self.activate_into(item, next, successor_route, step);
            }
        }
    }

    /// Activate `target` on behalf of `source`.
    ///
    /// When a finished target has used its attempts, only a repeating
    /// source fails (`MaxIterationsExceeded`); any other target keeps its
    /// record and the route simply ends there.
    fn activate_into(
        &mut self,
        source: &WorkItem,
        target: &str,
        route: Route,
        step: &mut SchedulerStep,
    ) {
        let result = self.state_manager().activate(target, route);
        match result {
            Activation::Activated | Activation::Reopened => {
                step.activated.push(target.to_string());
            }
            Activation::LimitReached if target == source.id => {
                let limit = self.graph.max_iterations();
                let attempt = self.store.attempt(target);
                let err = ItemError::MaxIterationsExceeded { limit };
                self.store.fail_latest(target, err.clone());
                self.record_failure(target, attempt, err, step);
            }
            Activation::LimitReached => {
                warn!(
                    item = %target,
                    routed_from = %source.id,
                    limit = self.graph.max_iterations(),
                    "route target has used all its attempts; not re-running it"
                );
            }
            Activation::AlreadyPending
            | Activation::Coalesced
            | Activation::Finished
            | Activation::Unknown => {}
        }
    }

    fn record_failure(&mut self, id: &str, attempt: u32, error: ItemError, step: &mut SchedulerStep) {
        self.errors.push(ItemFailure {
            item: id.to_string(),
            attempt,
            error,
        });
        if !step.newly_failed.iter().any(|f| f == id) {
            step.newly_failed.push(id.to_string());
        }
    }

    fn state_manager(&mut self) -> StateManager<'_> {
        StateManager::new(
            &self.graph,
            &mut self.store,
            &mut self.activated,
            &mut self.loop_state,
        )
    }

    fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&self.graph, &self.store, &self.activated)
    }
}

// src/dag/state_manager.rs

//! Per-run state management for work items in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::dag::graph::ProcessGraph;
use crate::dag::work_item::WorkItem;
use crate::store::ResultStore;
use crate::types::{ItemId, ItemStatus};

/// What happened when an item was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// The item joined the runnable frontier (pending its dependencies).
    Activated,
    /// It was already pending; nothing changed.
    AlreadyPending,
    /// It is currently in flight; the activation is coalesced.
    Coalesced,
    /// A terminal item was opened for another attempt.
    Reopened,
    /// The item already finished and the route does not re-enter it.
    Finished,
    /// A terminal item could not be reopened: its attempts are used up.
    LimitReached,
    /// Unknown id.
    Unknown,
}

/// How an activation reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Initial frontier or a first-pass successor edge. Finished items are
    /// left as they are.
    Forward,
    /// A condition table names the target, or the source is itself on a
    /// repeat pass. Finished items may start another attempt.
    Reenter,
}

/// Manages per-run state transitions for work items.
pub struct StateManager<'a> {
    graph: &'a ProcessGraph,
    store: &'a mut ResultStore,
    activated: &'a mut HashSet<ItemId>,
    loop_state: &'a mut HashMap<ItemId, String>,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a ProcessGraph,
        store: &'a mut ResultStore,
        activated: &'a mut HashSet<ItemId>,
        loop_state: &'a mut HashMap<ItemId, String>,
    ) -> Self {
        Self {
            graph,
            store,
            activated,
            loop_state,
        }
    }

    /// Make `id` eligible to run.
    ///
    /// - `NotStarted` items are added to the activated set.
    /// - `InProgress` items are left alone.
    /// - Terminal items reached by a [`Route::Forward`] edge are left alone.
    /// - Terminal items reached by [`Route::Reenter`] start a new attempt
    ///   while their attempt count is below `max_iterations`, carrying their
    ///   latest output as loop state. The store is untouched otherwise.
    pub fn activate(&mut self, id: &str, route: Route) -> Activation {
        let Some(status) = self.store.status(id) else {
            warn!(item = %id, "activation of unknown item; ignoring");
            return Activation::Unknown;
        };

        match status {
            ItemStatus::NotStarted => {
                if self.activated.insert(id.to_string()) {
                    debug!(item = %id, "item activated");
                    Activation::Activated
                } else {
                    Activation::AlreadyPending
                }
            }
            ItemStatus::InProgress => {
                debug!(item = %id, "item already in flight; activation coalesced");
                Activation::Coalesced
            }
            ItemStatus::Completed | ItemStatus::Failed if route == Route::Forward => {
                debug!(item = %id, status = %status, "item already finished; activation ignored");
                Activation::Finished
            }
            ItemStatus::Completed | ItemStatus::Failed => {
                let attempts = self.store.attempt(id);
                let limit = self.graph.max_iterations();
                if attempts >= limit {
                    warn!(
                        item = %id,
                        attempts,
                        limit,
                        "item re-entered too many times; not reopening"
                    );
                    return Activation::LimitReached;
                }

                if let Some(previous) = self.store.latest(id).map(|o| o.context_text()) {
                    self.loop_state.insert(id.to_string(), previous);
                }
                self.store.reopen(id);
                self.activated.insert(id.to_string());
                debug!(item = %id, next_attempt = attempts + 1, "item reopened for another attempt");
                Activation::Reopened
            }
        }
    }

    pub fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(self.graph, self.store, self.activated)
    }
}

/// A read-only view used for dependency and runnability checks.
pub struct ReadOnlyStateManager<'a> {
    graph: &'a ProcessGraph,
    store: &'a ResultStore,
    activated: &'a HashSet<ItemId>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(
        graph: &'a ProcessGraph,
        store: &'a ResultStore,
        activated: &'a HashSet<ItemId>,
    ) -> Self {
        Self {
            graph,
            store,
            activated,
        }
    }

    /// A dependency is satisfied once it completed, or once it failed while
    /// marked `skip_on_failure`.
    pub fn dependency_satisfied(&self, dep: &str) -> bool {
        match self.store.status(dep) {
            Some(ItemStatus::Completed) => true,
            Some(ItemStatus::Failed) => self
                .graph
                .get(dep)
                .is_some_and(|d| d.retry.skip_on_failure),
            _ => false,
        }
    }

    pub fn deps_satisfied(&self, item: &WorkItem) -> bool {
        item.depends_on
            .iter()
            .all(|dep| self.dependency_satisfied(dep))
    }

    /// The runnable predicate shared by every topology.
    pub fn is_runnable(&self, item: &WorkItem) -> bool {
        self.store.status(&item.id) == Some(ItemStatus::NotStarted)
            && self.activated.contains(&item.id)
            && self.deps_satisfied(item)
    }

    /// Runnable items in declaration order.
    pub fn runnable(&self) -> Vec<&'a WorkItem> {
        self.graph
            .items()
            .iter()
            .filter(|item| self.is_runnable(item))
            .collect()
    }

    /// First dependency keeping an activated item from running.
    pub fn blocking_dependency(&self, item: &WorkItem) -> Option<&'a ItemId> {
        self.graph
            .get(&item.id)?
            .depends_on
            .iter()
            .find(|dep| !self.dependency_satisfied(dep))
    }

    /// Activated items that are still `NotStarted` but cannot run.
    pub fn blocked(&self) -> Vec<(&'a WorkItem, Option<&'a ItemId>)> {
        self.graph
            .items()
            .iter()
            .filter(|item| {
                self.activated.contains(&item.id)
                    && self.store.status(&item.id) == Some(ItemStatus::NotStarted)
                    && !self.deps_satisfied(item)
            })
            .map(|item| (item, self.blocking_dependency(item)))
            .collect()
    }
}

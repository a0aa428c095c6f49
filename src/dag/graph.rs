// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::debug;

use crate::config::validate::validate_items;
use crate::dag::work_item::{RetryPolicy, WorkItem};
use crate::errors::Result;
use crate::types::{ItemId, Topology};

/// The worker that plays manager in the hierarchical topology.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSpec {
    pub worker: String,
    /// Retry policy for the manager's own choice calls.
    pub retry: RetryPolicy,
}

/// Process-wide settings that accompany the item registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSettings {
    pub topology: Topology,
    /// Upper bound on attempts of any single item (loop safety bound).
    pub max_iterations: u32,
    /// Upper bound on concurrently in-flight worker calls.
    pub max_concurrency: usize,
    pub manager: Option<ManagerSpec>,
    /// Worker used by items that do not name one.
    pub default_worker: Option<String>,
    pub deadline: Option<Duration>,
    /// How long a cancelled run waits for in-flight items to report back.
    pub cancel_grace: Duration,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            topology: Topology::Sequential,
            max_iterations: 10,
            max_concurrency: 4,
            manager: None,
            default_worker: None,
            deadline: None,
            cancel_grace: Duration::from_secs(2),
        }
    }
}

impl ProcessSettings {
    pub fn with_topology(topology: Topology) -> Self {
        Self {
            topology,
            ..Self::default()
        }
    }
}

/// Immutable registry of work items plus the topology they run under.
///
/// Items keep their declaration order, which is the tie-breaker everywhere
/// the scheduler has a choice.
#[derive(Debug, Clone)]
pub struct ProcessGraph {
    settings: ProcessSettings,
    items: Vec<WorkItem>,
    index: HashMap<ItemId, usize>,
    /// Reverse of `depends_on`: who consumes each item's output.
    dependents: HashMap<ItemId, Vec<ItemId>>,
    vars: BTreeMap<String, String>,
}

impl ProcessGraph {
    /// Register `items` under `settings` and validate the result.
    ///
    /// Items with an empty id receive a fresh UUID; duplicate entries in
    /// `depends_on` are dropped (first occurrence wins).
    pub fn new(settings: ProcessSettings, items: Vec<WorkItem>) -> Result<Self> {
        Self::with_vars(settings, items, BTreeMap::new())
    }

    pub fn with_vars(
        settings: ProcessSettings,
        mut items: Vec<WorkItem>,
        vars: BTreeMap<String, String>,
    ) -> Result<Self> {
        for item in items.iter_mut() {
            if item.id.trim().is_empty() {
                item.id = uuid::Uuid::new_v4().to_string();
                if item.name.is_empty() {
                    item.name = item.id.clone();
                }
                debug!(item = %item.id, "assigned id to anonymous work item");
            }
            dedup_in_place(&mut item.depends_on);
        }

        validate_items(&settings, &items)?;

        let index: HashMap<ItemId, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();

        let mut dependents: HashMap<ItemId, Vec<ItemId>> = HashMap::new();
        for item in items.iter() {
            for dep in item.depends_on.iter() {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(item.id.clone());
            }
        }

        Ok(Self {
            settings,
            items,
            index,
            dependents,
            vars,
        })
    }

    pub fn builder(topology: Topology) -> ProcessGraphBuilder {
        ProcessGraphBuilder {
            settings: ProcessSettings::with_topology(topology),
            items: Vec::new(),
            vars: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn topology(&self) -> Topology {
        self.settings.topology
    }

    pub fn max_iterations(&self) -> u32 {
        self.settings.max_iterations
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Items in declaration order.
    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Declaration position of an item.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Items listed in this item's `depends_on`.
    pub fn dependencies_of(&self, id: &str) -> &[ItemId] {
        self.get(id)
            .map(|item| item.depends_on.as_slice())
            .unwrap_or(&[])
    }

    /// Items that list `id` in their `depends_on`.
    pub fn dependents_of(&self, id: &str) -> &[ItemId] {
        self.dependents
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn entry_points(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter().filter(|item| item.entry_point)
    }

    /// Effective worker for an item: its own, else the process default.
    pub fn worker_for<'a>(&'a self, item: &'a WorkItem) -> Option<&'a str> {
        item.worker
            .as_deref()
            .or(self.settings.default_worker.as_deref())
    }
}

/// Fluent construction of a [`ProcessGraph`], mostly for programmatic use
/// and tests. `build` runs the same validation as the config loader.
#[derive(Debug)]
pub struct ProcessGraphBuilder {
    settings: ProcessSettings,
    items: Vec<WorkItem>,
    vars: BTreeMap<String, String>,
}

impl ProcessGraphBuilder {
    pub fn item(mut self, item: WorkItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.settings.max_iterations = n;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.settings.max_concurrency = n;
        self
    }

    pub fn manager(mut self, worker: impl Into<String>, retry: RetryPolicy) -> Self {
        self.settings.manager = Some(ManagerSpec {
            worker: worker.into(),
            retry,
        });
        self
    }

    pub fn default_worker(mut self, worker: impl Into<String>) -> Self {
        self.settings.default_worker = Some(worker.into());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.settings.deadline = Some(deadline);
        self
    }

    pub fn cancel_grace(mut self, grace: Duration) -> Self {
        self.settings.cancel_grace = grace;
        self
    }

    pub fn var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<ProcessGraph> {
        ProcessGraph::with_vars(self.settings, self.items, self.vars)
    }
}

fn dedup_in_place(ids: &mut Vec<ItemId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_items_receive_ids() {
        let graph = ProcessGraph::builder(Topology::Sequential)
            .item(WorkItem::new("").describe("first"))
            .build()
            .unwrap();
        let id = &graph.items()[0].id;
        assert!(!id.is_empty());
        assert!(graph.contains(id));
    }

    #[test]
    fn duplicate_context_entries_collapse() {
        let graph = ProcessGraph::builder(Topology::Sequential)
            .item(WorkItem::new("a"))
            .item(WorkItem::new("b").depends_on("a").depends_on("a"))
            .build()
            .unwrap();
        assert_eq!(graph.dependencies_of("b"), &["a".to_string()]);
        assert_eq!(graph.dependents_of("a"), &["b".to_string()]);
    }

    #[test]
    fn worker_falls_back_to_default() {
        let graph = ProcessGraph::builder(Topology::Sequential)
            .default_worker("general")
            .item(WorkItem::new("a"))
            .item(WorkItem::new("b").worker("special"))
            .build()
            .unwrap();
        let a = graph.get("a").unwrap();
        let b = graph.get("b").unwrap();
        assert_eq!(graph.worker_for(a), Some("general"));
        assert_eq!(graph.worker_for(b), Some("special"));
    }
}

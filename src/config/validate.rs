// src/config/validate.rs

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::config::duration::parse_duration;
use crate::config::model::{
    GraphFile, RawGraphFile, RawItemKind, RawOutputSchema, RawWorkItem, RetrySection,
    WorkerConfig,
};
use crate::dag::work_item::{
    ConditionTable, FieldKind, ItemKind, OutputSchema, RetryPolicy, TypedSchema, WorkItem,
};
use crate::dag::{ManagerSpec, ProcessGraph, ProcessSettings};
use crate::errors::{FlowdagError, Result};
use crate::types::{ConcurrencyHint, Topology};

impl TryFrom<RawGraphFile> for GraphFile {
    type Error = FlowdagError;

    fn try_from(raw: RawGraphFile) -> std::result::Result<Self, Self::Error> {
        let default_retry = raw.defaults.retry.apply(RetryPolicy::default())?;
        let default_concurrency = raw.defaults.concurrency.unwrap_or_default();

        let settings = settings_from_raw(&raw)?;

        let items = raw
            .item
            .into_iter()
            .enumerate()
            .map(|(pos, item)| item_from_raw(pos, item, &default_retry, default_concurrency))
            .collect::<Result<Vec<_>>>()?;

        for (name, worker) in raw.worker.iter() {
            validate_worker_config(name, worker)?;
        }

        let graph = ProcessGraph::with_vars(settings, items, raw.vars)?;

        Ok(GraphFile {
            graph,
            workers: raw.worker,
        })
    }
}

impl RetrySection {
    /// Overlay the fields present in this table on `base`.
    pub fn apply(&self, base: RetryPolicy) -> Result<RetryPolicy> {
        let mut policy = base;
        if let Some(n) = self.max_retries {
            policy.max_retries = n;
        }
        if let Some(ref s) = self.retry_delay {
            policy.retry_delay = duration_field("retry_delay", s)?;
        }
        if let Some(b) = self.exponential_backoff {
            policy.exponential_backoff = b;
        }
        if let Some(ref s) = self.max_delay {
            policy.max_delay = duration_field("max_delay", s)?;
        }
        if let Some(b) = self.skip_on_failure {
            policy.skip_on_failure = b;
        }
        Ok(policy)
    }
}

fn duration_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| FlowdagError::config(format!("invalid `{field}`: {e}")))
}

fn settings_from_raw(raw: &RawGraphFile) -> Result<ProcessSettings> {
    let p = &raw.process;

    let manager = match p.manager {
        Some(ref worker) => {
            let retry = match p.manager_retry {
                Some(ref section) => section.apply(RetryPolicy::default())?,
                None => RetryPolicy::default(),
            };
            Some(ManagerSpec {
                worker: worker.clone(),
                retry,
            })
        }
        None => None,
    };

    let deadline = p
        .deadline
        .as_deref()
        .map(|s| duration_field("deadline", s))
        .transpose()?;

    let cancel_grace = match p.cancel_grace {
        Some(ref s) => duration_field("cancel_grace", s)?,
        None => ProcessSettings::default().cancel_grace,
    };

    Ok(ProcessSettings {
        topology: p.topology,
        max_iterations: p.max_iterations,
        max_concurrency: p.max_concurrency,
        manager,
        default_worker: p.default_worker.clone(),
        deadline,
        cancel_grace,
    })
}

fn item_from_raw(
    pos: usize,
    raw: RawWorkItem,
    default_retry: &RetryPolicy,
    default_concurrency: ConcurrencyHint,
) -> Result<WorkItem> {
    let id = raw.id.unwrap_or_default();
    let label = if id.is_empty() {
        format!("#{}", pos + 1)
    } else {
        format!("'{id}'")
    };

    let kind = match (raw.kind, raw.branches) {
        (RawItemKind::Plain, None) => ItemKind::Plain,
        (RawItemKind::Plain, Some(_)) => {
            return Err(FlowdagError::config(format!(
                "item {label} is a plain item but declares `branches`; use kind = \"decision\" or \"loop\""
            )));
        }
        (RawItemKind::Decision | RawItemKind::Loop, None) => {
            return Err(FlowdagError::config(format!(
                "item {label} is a {} item but has no `branches` condition table",
                kind_name(raw.kind)
            )));
        }
        (RawItemKind::Decision, Some(ref map)) => {
            ItemKind::Decision(table_from_map(&label, map)?)
        }
        (RawItemKind::Loop, Some(ref map)) => ItemKind::Loop(table_from_map(&label, map)?),
    };

    let retry = match raw.retry {
        Some(ref section) => section.apply(default_retry.clone())?,
        None => default_retry.clone(),
    };

    let output_schema = match raw.output_schema {
        Some(ref schema) => schema_from_raw(&label, schema)?,
        None => OutputSchema::None,
    };

    Ok(WorkItem {
        name: raw.name.unwrap_or_else(|| id.clone()),
        id,
        description: raw.description,
        expected_output: raw.expected_output,
        worker: raw.worker,
        kind,
        depends_on: raw.context,
        successors: raw.successors,
        entry_point: raw.entry,
        retry,
        concurrency: raw.concurrency.unwrap_or(default_concurrency),
        output_schema,
        guardrail: raw.guardrail,
        tools: raw.tools,
    })
}

fn kind_name(kind: RawItemKind) -> &'static str {
    match kind {
        RawItemKind::Plain => "plain",
        RawItemKind::Decision => "decision",
        RawItemKind::Loop => "loop",
    }
}

fn table_from_map(label: &str, map: &BTreeMap<String, Vec<String>>) -> Result<ConditionTable> {
    ConditionTable::from_map(map)
        .map_err(|e| FlowdagError::config(format!("item {label}: {e}")))
}

fn schema_from_raw(label: &str, raw: &RawOutputSchema) -> Result<OutputSchema> {
    match raw.format.trim().to_lowercase().as_str() {
        "none" | "raw" => Ok(OutputSchema::None),
        "json" => Ok(OutputSchema::Json {
            schema: raw
                .schema
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        }),
        "typed" => {
            let name = raw.name.clone().ok_or_else(|| {
                FlowdagError::config(format!("item {label}: typed output schema needs a `name`"))
            })?;
            let mut fields = Vec::with_capacity(raw.fields.len());
            for (field, kind) in raw.fields.iter() {
                let kind: FieldKind = kind.parse().map_err(|e| {
                    FlowdagError::config(format!("item {label}: field '{field}': {e}"))
                })?;
                fields.push((field.clone(), kind));
            }
            Ok(OutputSchema::Typed(TypedSchema { name, fields }))
        }
        other => Err(FlowdagError::config(format!(
            "item {label}: unknown output schema format '{other}' (expected json or typed)"
        ))),
    }
}

fn validate_worker_config(name: &str, worker: &WorkerConfig) -> Result<()> {
    if worker.cmd.trim().is_empty() {
        return Err(FlowdagError::config(format!(
            "worker '{name}' has an empty `cmd`"
        )));
    }
    if let Some(ref t) = worker.timeout {
        duration_field("timeout", t)?;
    }
    Ok(())
}

/// Validate a registry of items under `settings`.
///
/// Shared by the config loader and programmatic construction; called from
/// [`ProcessGraph::new`].
pub fn validate_items(settings: &ProcessSettings, items: &[WorkItem]) -> Result<()> {
    ensure_has_items(items)?;
    validate_settings(settings)?;
    validate_unique_ids(items)?;
    validate_references(items)?;
    validate_context_dag(items)?;
    validate_topology(settings, items)?;
    Ok(())
}

fn ensure_has_items(items: &[WorkItem]) -> Result<()> {
    if items.is_empty() {
        return Err(FlowdagError::config(
            "graph must contain at least one [[item]]",
        ));
    }
    Ok(())
}

fn validate_settings(settings: &ProcessSettings) -> Result<()> {
    if settings.max_iterations == 0 {
        return Err(FlowdagError::config(
            "[process].max_iterations must be >= 1 (got 0)",
        ));
    }
    if settings.max_concurrency == 0 {
        return Err(FlowdagError::config(
            "[process].max_concurrency must be >= 1 (got 0)",
        ));
    }
    Ok(())
}

fn validate_unique_ids(items: &[WorkItem]) -> Result<()> {
    let mut seen = HashSet::new();
    for item in items.iter() {
        if !seen.insert(item.id.as_str()) {
            return Err(FlowdagError::config(format!(
                "item id '{}' is declared more than once",
                item.id
            )));
        }
    }
    Ok(())
}

fn validate_references(items: &[WorkItem]) -> Result<()> {
    let known: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();

    for item in items.iter() {
        for dep in item.depends_on.iter() {
            if !known.contains(dep.as_str()) {
                return Err(FlowdagError::config(format!(
                    "item '{}' has unknown dependency '{}' in `context`",
                    item.id, dep
                )));
            }
            if dep == &item.id {
                return Err(FlowdagError::config(format!(
                    "item '{}' cannot use its own output as context",
                    item.id
                )));
            }
        }

        for next in item.successors.iter() {
            if !known.contains(next.as_str()) {
                return Err(FlowdagError::config(format!(
                    "item '{}' has unknown successor '{}'",
                    item.id, next
                )));
            }
        }

        if let Some(table) = item.kind.condition_table() {
            for branch in table.branches() {
                for target in branch.next.iter() {
                    if !known.contains(target.as_str()) {
                        return Err(FlowdagError::config(format!(
                            "item '{}' branch '{}' targets unknown item '{}'",
                            item.id, branch.key, target
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_context_dag(items: &[WorkItem]) -> Result<()> {
    // Edge direction: dependency -> consumer.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for item in items.iter() {
        graph.add_node(item.id.as_str());
    }

    for item in items.iter() {
        for dep in item.depends_on.iter() {
            graph.add_edge(dep.as_str(), item.id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(FlowdagError::DependencyCycle(format!(
            "cycle detected in `context` dependencies involving item '{}'",
            cycle.node_id()
        ))),
    }
}

fn validate_topology(settings: &ProcessSettings, items: &[WorkItem]) -> Result<()> {
    match settings.topology {
        Topology::Sequential => Ok(()),
        Topology::Hierarchical => {
            if settings.manager.is_none() {
                return Err(FlowdagError::config(
                    "hierarchical topology requires [process].manager",
                ));
            }
            Ok(())
        }
        Topology::WorkflowGraph => {
            let entries: Vec<&str> = items
                .iter()
                .filter(|i| i.entry_point)
                .map(|i| i.id.as_str())
                .collect();
            if entries.is_empty() {
                return Err(FlowdagError::config(
                    "workflow_graph topology requires at least one item with `entry = true`",
                ));
            }
            warn_unreachable(items, &entries);
            warn_loops_without_repeat(items);
            Ok(())
        }
    }
}

/// Items not reachable from any entry point through successors or branch
/// tables can never run in graph mode. That is legal but usually a mistake.
fn warn_unreachable(items: &[WorkItem], entries: &[&str]) {
    let mut reached: HashSet<&str> = entries.iter().copied().collect();
    let mut queue: VecDeque<&str> = entries.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        let Some(item) = items.iter().find(|i| i.id == id) else {
            continue;
        };
        let table_targets = item
            .kind
            .condition_table()
            .into_iter()
            .flat_map(|t| t.targets());
        for next in item.successors.iter().chain(table_targets) {
            if reached.insert(next.as_str()) {
                queue.push_back(next.as_str());
            }
        }
    }

    for item in items.iter() {
        if !reached.contains(item.id.as_str()) {
            warn!(item = %item.id, "item is not reachable from any entry point");
        }
    }
}

fn warn_loops_without_repeat(items: &[WorkItem]) {
    for item in items.iter() {
        if let ItemKind::Loop(ref table) = item.kind {
            if !table.targets().any(|t| t == &item.id) {
                warn!(
                    item = %item.id,
                    "loop item has no branch that selects itself; it will never repeat"
                );
            }
        }
    }
}

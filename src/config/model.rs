// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::ProcessGraph;
use crate::types::{ConcurrencyHint, Topology};

/// Top-level graph definition as read from a TOML (or JSON) file.
///
/// ```toml
/// [process]
/// topology = "workflow_graph"
/// max_iterations = 5
///
/// [defaults.retry]
/// max_retries = 1
///
/// [worker.writer]
/// cmd = "cat"
///
/// [[item]]
/// id = "draft"
/// entry = true
/// successors = ["review"]
///
/// [[item]]
/// id = "review"
/// kind = "decision"
/// context = ["draft"]
/// branches = { approved = [], rejected = ["draft"] }
/// ```
///
/// Items are an array of tables so their declaration order survives
/// deserialization.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawGraphFile {
    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub defaults: DefaultSection,

    /// Template variables substituted into `{{var}}` placeholders.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,

    /// Command-backed workers from `[worker.<name>]`.
    #[serde(default)]
    pub worker: BTreeMap<String, WorkerConfig>,

    #[serde(default)]
    pub item: Vec<RawWorkItem>,
}

/// `[process]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    #[serde(default)]
    pub topology: Topology,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Worker acting as manager (hierarchical topology only).
    #[serde(default)]
    pub manager: Option<String>,

    /// Overrides for the manager's retry policy.
    #[serde(default)]
    pub manager_retry: Option<RetrySection>,

    #[serde(default)]
    pub default_worker: Option<String>,

    /// Per-run deadline, e.g. `"2m"`.
    #[serde(default)]
    pub deadline: Option<String>,

    /// Grace period for in-flight items after cancellation, e.g. `"2s"`.
    #[serde(default)]
    pub cancel_grace: Option<String>,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            topology: Topology::default(),
            max_iterations: default_max_iterations(),
            max_concurrency: default_max_concurrency(),
            manager: None,
            manager_retry: None,
            default_worker: None,
            deadline: None,
            cancel_grace: None,
        }
    }
}

/// `[defaults]` section: values applied to items that don't override them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub concurrency: Option<ConcurrencyHint>,
}

/// A retry table. Every field is optional so item tables can override
/// `[defaults.retry]` one field at a time.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RetrySection {
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Duration string, e.g. `"500ms"`.
    #[serde(default)]
    pub retry_delay: Option<String>,

    #[serde(default)]
    pub exponential_backoff: Option<bool>,

    #[serde(default)]
    pub max_delay: Option<String>,

    #[serde(default)]
    pub skip_on_failure: Option<bool>,
}

/// `kind = "..."` on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RawItemKind {
    #[default]
    Plain,
    Decision,
    Loop,
}

/// `[[item]]` entry.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkItem {
    /// Stable id; generated when omitted.
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub expected_output: Option<String>,

    #[serde(default)]
    pub worker: Option<String>,

    #[serde(default)]
    pub kind: RawItemKind,

    /// Items whose outputs feed this item's input.
    #[serde(default)]
    pub context: Vec<String>,

    #[serde(default)]
    pub successors: Vec<String>,

    /// Condition table for decision and loop items.
    #[serde(default)]
    pub branches: Option<BTreeMap<String, Vec<String>>>,

    #[serde(default)]
    pub entry: bool,

    #[serde(default)]
    pub retry: Option<RetrySection>,

    #[serde(default)]
    pub concurrency: Option<ConcurrencyHint>,

    #[serde(default)]
    pub output_schema: Option<RawOutputSchema>,

    #[serde(default)]
    pub guardrail: Option<String>,

    #[serde(default)]
    pub tools: Vec<String>,
}

/// `output_schema = { format = "json", schema = {...} }` or
/// `output_schema = { format = "typed", name = "Review", fields = { score = "number" } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawOutputSchema {
    pub format: String,

    #[serde(default)]
    pub schema: Option<serde_json::Value>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// `[worker.<name>]` section: a shell command that receives the aggregated
/// input on stdin and answers on stdout.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub cmd: String,

    #[serde(default)]
    pub timeout: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A validated graph file: the process graph plus the command workers it
/// declares.
#[derive(Debug, Clone)]
pub struct GraphFile {
    pub graph: ProcessGraph,
    pub workers: BTreeMap<String, WorkerConfig>,
}

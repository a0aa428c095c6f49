// src/dag/work_item.rs

//! Declared units of work and their static relationships.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::errors::FlowdagError;
use crate::types::{ConcurrencyHint, ItemId};

/// Normalize a classification string or branch key for lookup.
pub fn normalize_key(s: &str) -> String {
    s.trim().to_lowercase()
}

/// One arm of a [`ConditionTable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Branch {
    /// Normalized classification key.
    pub key: String,
    /// Items activated when this arm is selected; empty ends the branch.
    pub next: Vec<ItemId>,
}

/// Result of looking a classification up in a [`ConditionTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSelection<'a> {
    /// Activate these items.
    Next(&'a [ItemId]),
    /// The selected arm is empty: this branch of the graph ends here.
    Terminate,
    /// No declared key matched.
    Unmatched { classification: String },
}

/// Finite set of classification outcomes declared for a decision or loop
/// item at graph-build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionTable {
    branches: Vec<Branch>,
}

impl ConditionTable {
    /// Build a table from `(key, next)` pairs.
    ///
    /// Keys are normalized. Returns the offending key if two keys collide
    /// after normalization, or an error if the table is empty.
    pub fn new<K, I>(arms: I) -> Result<Self, String>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Vec<ItemId>)>,
    {
        let mut branches: Vec<Branch> = Vec::new();
        for (key, next) in arms {
            let key = normalize_key(key.as_ref());
            if key.is_empty() {
                return Err("condition table contains an empty key".to_string());
            }
            if branches.iter().any(|b| b.key == key) {
                return Err(format!("condition table key '{key}' is declared twice"));
            }
            branches.push(Branch { key, next });
        }

        if branches.is_empty() {
            return Err("condition table has no branches".to_string());
        }

        Ok(Self { branches })
    }

    pub fn from_map(map: &BTreeMap<String, Vec<ItemId>>) -> Result<Self, String> {
        Self::new(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn keys(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.key.clone()).collect()
    }

    /// Every item id referenced by any arm.
    pub fn targets(&self) -> impl Iterator<Item = &ItemId> {
        self.branches.iter().flat_map(|b| b.next.iter())
    }

    /// Exact lookup of the normalized classification. An unmatched
    /// classification is handed back as the worker wrote it.
    pub fn resolve(&self, classification: &str) -> BranchSelection<'_> {
        let wanted = normalize_key(classification);
        match self.branches.iter().find(|b| b.key == wanted) {
            Some(branch) if branch.next.is_empty() => BranchSelection::Terminate,
            Some(branch) => BranchSelection::Next(&branch.next),
            None => BranchSelection::Unmatched {
                classification: classification.to_string(),
            },
        }
    }
}

/// What an item does with its outcome once it completes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "branches", rename_all = "lowercase")]
pub enum ItemKind {
    /// Activates `successors` on completion.
    #[default]
    Plain,
    /// Routes on its classification through the table.
    Decision(ConditionTable),
    /// Routes like a decision; selecting its own id repeats the item.
    Loop(ConditionTable),
}

impl ItemKind {
    pub fn condition_table(&self) -> Option<&ConditionTable> {
        match self {
            ItemKind::Plain => None,
            ItemKind::Decision(table) | ItemKind::Loop(table) => Some(table),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ItemKind::Plain => "plain",
            ItemKind::Decision(_) => "decision",
            ItemKind::Loop(_) => "loop",
        }
    }
}

/// Retry behaviour for one item (or for the hierarchical manager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Additional invocations after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub exponential_backoff: bool,
    /// Upper bound on any single retry delay.
    pub max_delay: Duration,
    /// When the item ends `Failed`, dependents treat it as satisfied and its
    /// `successors` are still activated.
    pub skip_on_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::ZERO,
            exponential_backoff: false,
            max_delay: Duration::from_secs(30),
            skip_on_failure: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = if self.exponential_backoff {
            let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
            self.retry_delay.saturating_mul(factor)
        } else {
            self.retry_delay
        };
        base.min(self.max_delay)
    }

    /// Total number of worker invocations this policy allows.
    pub fn max_invocations(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Field kinds understood by [`TypedSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl std::str::FromStr for FieldKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" => Ok(FieldKind::String),
            "number" | "float" => Ok(FieldKind::Number),
            "integer" | "int" => Ok(FieldKind::Integer),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            "array" | "list" => Ok(FieldKind::Array),
            "object" | "map" => Ok(FieldKind::Object),
            "any" => Ok(FieldKind::Any),
            other => Err(format!("unknown field type '{other}'")),
        }
    }
}

/// A named record shape: every field must be present with the right kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypedSchema {
    pub name: String,
    pub fields: Vec<(String, FieldKind)>,
}

/// Governs how raw executor output is parsed.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum OutputSchema {
    #[default]
    None,
    /// A JSON Schema document; `type` and `required` are enforced.
    Json { schema: serde_json::Value },
    Typed(TypedSchema),
}

/// A declared unit of orchestrated work.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Authoritative identifier for graph edges. Assigned at registration if
    /// left empty.
    pub id: ItemId,
    /// Human label; may collide across items.
    pub name: String,
    pub description: String,
    pub expected_output: Option<String>,
    /// Worker the item is assigned to (falls back to the process default).
    pub worker: Option<String>,
    pub kind: ItemKind,
    /// Items whose outputs are aggregated into this item's input.
    pub depends_on: Vec<ItemId>,
    /// Items activated once this item completes (plain items), or when it
    /// fails with `skip_on_failure` (any kind).
    pub successors: Vec<ItemId>,
    pub entry_point: bool,
    pub retry: RetryPolicy,
    pub concurrency: ConcurrencyHint,
    pub output_schema: OutputSchema,
    /// Name of a registered validator.
    pub guardrail: Option<String>,
    /// Names of registered tools offered to the worker.
    pub tools: Vec<String>,
}

impl WorkItem {
    pub fn new(id: impl Into<ItemId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            expected_output: None,
            worker: None,
            kind: ItemKind::Plain,
            depends_on: Vec::new(),
            successors: Vec::new(),
            entry_point: false,
            retry: RetryPolicy::default(),
            concurrency: ConcurrencyHint::Sync,
            output_schema: OutputSchema::None,
            guardrail: None,
            tools: Vec::new(),
        }
    }

    /// A decision item routing on `arms`.
    pub fn decision<K: AsRef<str>>(
        id: impl Into<ItemId>,
        arms: impl IntoIterator<Item = (K, Vec<ItemId>)>,
    ) -> crate::errors::Result<Self> {
        let item = Self::new(id);
        let table = ConditionTable::new(arms).map_err(|e| {
            FlowdagError::config(format!("decision item '{}': {e}", item.id))
        })?;
        Ok(item.with_kind(ItemKind::Decision(table)))
    }

    /// A loop item routing on `arms`. Listing the item's own id in an arm
    /// makes it repeat.
    pub fn looping<K: AsRef<str>>(
        id: impl Into<ItemId>,
        arms: impl IntoIterator<Item = (K, Vec<ItemId>)>,
    ) -> crate::errors::Result<Self> {
        let item = Self::new(id);
        let table = ConditionTable::new(arms)
            .map_err(|e| FlowdagError::config(format!("loop item '{}': {e}", item.id)))?;
        Ok(item.with_kind(ItemKind::Loop(table)))
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn expect_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    pub fn worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn depends_on(mut self, id: impl Into<ItemId>) -> Self {
        self.depends_on.push(id.into());
        self
    }

    pub fn then(mut self, id: impl Into<ItemId>) -> Self {
        self.successors.push(id.into());
        self
    }

    pub fn entry(mut self) -> Self {
        self.entry_point = true;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.concurrency = ConcurrencyHint::Async;
        self
    }

    pub fn schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn guardrail(mut self, name: impl Into<String>) -> Self {
        self.guardrail = Some(name.into());
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    pub fn is_loop(&self) -> bool {
        matches!(self.kind, ItemKind::Loop(_))
    }

    /// Every item id this item refers to, in any role.
    pub fn references(&self) -> impl Iterator<Item = &ItemId> {
        let table_targets = self
            .kind
            .condition_table()
            .into_iter()
            .flat_map(|t| t.targets());
        self.depends_on
            .iter()
            .chain(self.successors.iter())
            .chain(table_targets)
    }
}

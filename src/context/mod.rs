// src/context/mod.rs

//! Context Builder.
//!
//! Assembles the input for one attempt of a work item from the outputs of
//! its `depends_on` items, its own description and expected output, the
//! previous loop iteration (if any) and an optional retrieval step.
//!
//! [`ContextBuilder::build`] is synchronous and only reads the
//! [`ResultStore`]; [`enrich`] is the async half that talks to a
//! [`Retriever`].

pub mod template;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::dag::work_item::WorkItem;
use crate::store::ResultStore;
use crate::types::{BoxFuture, ItemId, ItemStatus};

/// External context source queried once per attempt.
pub trait Retriever: Send + Sync {
    fn fetch_context<'a>(
        &'a self,
        query: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
}

/// Everything an executor is given for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedInput {
    pub item: ItemId,
    /// Outputs of completed dependencies, in `depends_on` order, deduplicated.
    pub context: Vec<String>,
    /// Description after template substitution.
    pub task: String,
    pub expected_output: Option<String>,
    /// Output of the previous attempt when the item is re-entered.
    pub loop_state: Option<String>,
    pub retrieved: Option<String>,
    /// Latest validator rejection reason.
    pub feedback: Option<String>,
}

impl AggregatedInput {
    /// Input that consists of a task text only.
    pub fn from_task(item: impl Into<ItemId>, task: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn with_feedback(&self, reason: impl Into<String>) -> Self {
        Self {
            feedback: Some(reason.into()),
            ..self.clone()
        }
    }

    /// Text used to query a retriever: the task, or the context when the
    /// item has no description.
    pub fn query(&self) -> String {
        if self.task.trim().is_empty() {
            self.context.join("\n\n")
        } else {
            self.task.clone()
        }
    }

    /// The string handed to the worker.
    ///
    /// Context blocks come first, unlabeled and separated by blank lines.
    /// Labeled sections follow only when they have content, so an item with
    /// no description and a single predecessor sees exactly that
    /// predecessor's output.
    pub fn render(&self) -> String {
        let mut blocks: Vec<String> = self
            .context
            .iter()
            .filter(|c| !c.is_empty())
            .cloned()
            .collect();

        let sections = [
            ("Previous attempt", self.loop_state.as_deref()),
            ("Retrieved context", self.retrieved.as_deref()),
            ("Task", Some(self.task.as_str())),
            ("Expected output", self.expected_output.as_deref()),
            ("Feedback", self.feedback.as_deref()),
        ];

        for (label, body) in sections {
            if let Some(body) = body.map(str::trim).filter(|b| !b.is_empty()) {
                blocks.push(format!("# {label}\n{body}"));
            }
        }

        blocks.join("\n\n")
    }
}

/// Builds [`AggregatedInput`]s from the result store.
#[derive(Debug, Clone, Copy)]
pub struct ContextBuilder<'a> {
    vars: &'a BTreeMap<String, String>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(vars: &'a BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Assemble the input for `item`. Never mutates the store.
    ///
    /// Dependencies that are not `Completed` contribute nothing.
    pub fn build(
        &self,
        item: &WorkItem,
        store: &ResultStore,
        loop_state: Option<String>,
    ) -> AggregatedInput {
        let mut context: Vec<String> = Vec::with_capacity(item.depends_on.len());

        for dep in item.depends_on.iter() {
            if store.status(dep) != Some(ItemStatus::Completed) {
                debug!(item = %item.id, dep = %dep, "dependency not completed; skipping its output");
                continue;
            }
            let Some(outcome) = store.latest(dep) else {
                continue;
            };
            let text = outcome.context_text();
            if text.is_empty() || context.contains(&text) {
                continue;
            }
            context.push(text);
        }

        AggregatedInput {
            item: item.id.clone(),
            context,
            task: template::render(&item.description, self.vars),
            expected_output: item
                .expected_output
                .as_deref()
                .map(|e| template::render(e, self.vars)),
            loop_state,
            retrieved: None,
            feedback: None,
        }
    }
}

/// Query `retriever` once and attach the result to `input`.
///
/// Retrieval failures are logged and do not fail the attempt.
pub async fn enrich(input: &mut AggregatedInput, retriever: Option<&dyn Retriever>) {
    let Some(retriever) = retriever else {
        return;
    };

    let query = input.query();
    if query.trim().is_empty() {
        return;
    }

    match retriever.fetch_context(&query).await {
        Ok(Some(text)) if !text.trim().is_empty() => {
            debug!(item = %input.item, bytes = text.len(), "retrieved extra context");
            input.retrieved = Some(text);
        }
        Ok(_) => {
            debug!(item = %input.item, "retriever returned no context");
        }
        Err(err) => {
            warn!(item = %input.item, error = %err, "context retrieval failed; continuing without it");
        }
    }
}

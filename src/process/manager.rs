// src/process/manager.rs

//! The hierarchical manager: a worker that picks the next item and who
//! should run it.

use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AggregatedInput;
use crate::dag::{ManagerSpec, OutputSchema, ProcessGraph};
use crate::exec::guard::{self, GuardCall, GuardTarget};
use crate::exec::parse::extract_json;
use crate::exec::{Roster, Validator, Verdict};
use crate::store::ResultStore;
use crate::types::{BoxFuture, ItemId, ItemStatus};

/// Id under which manager calls show up in logs and worker requests.
pub const MANAGER_ITEM: &str = "manager";

/// The manager's decision for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub item: ItemId,
    pub worker: String,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    item: String,
    worker: String,
}

/// Accepts a manager answer only when it names a runnable item and an
/// assignable worker. The accepted text is normalized to compact JSON.
#[derive(Debug)]
struct ChoiceValidator {
    runnable: Vec<ItemId>,
    workers: Vec<String>,
}

impl ChoiceValidator {
    fn check(&self, output: &str) -> Verdict {
        let value = match extract_json(output) {
            Ok(value) => value,
            Err(e) => return Verdict::reject(format!("answer is not JSON: {e}")),
        };
        let choice: RawChoice = match serde_json::from_value(value) {
            Ok(choice) => choice,
            Err(e) => {
                return Verdict::reject(format!(
                    "answer must be an object with string fields \"item\" and \"worker\": {e}"
                ));
            }
        };

        let item = choice.item.trim();
        let worker = choice.worker.trim();

        if !self.runnable.iter().any(|id| id == item) {
            return Verdict::reject(format!(
                "'{item}' is not runnable; choose one of: {}",
                self.runnable.join(", ")
            ));
        }
        if !self.workers.iter().any(|w| w == worker) {
            return Verdict::reject(format!(
                "'{worker}' is not an available worker; choose one of: {}",
                self.workers.join(", ")
            ));
        }

        Verdict::replace(json!({ "item": item, "worker": worker }).to_string())
    }
}

impl Validator for ChoiceValidator {
    fn validate<'a>(
        &'a self,
        _input: &'a AggregatedInput,
        output: &'a str,
    ) -> BoxFuture<'a, Verdict> {
        let verdict = self.check(output);
        Box::pin(async move { verdict })
    }
}

/// Asks the manager worker to choose, with a declaration-order fallback.
#[derive(Debug, Clone, Copy)]
pub struct Manager<'a> {
    spec: &'a ManagerSpec,
    graph: &'a ProcessGraph,
    roster: &'a Roster,
}

impl<'a> Manager<'a> {
    pub fn new(spec: &'a ManagerSpec, graph: &'a ProcessGraph, roster: &'a Roster) -> Self {
        Self {
            spec,
            graph,
            roster,
        }
    }

    /// Registered workers other than the manager itself, sorted by name.
    pub fn assignable_workers(&self) -> Vec<String> {
        let mut workers: Vec<String> = self
            .roster
            .worker_names()
            .filter(|name| *name != self.spec.worker)
            .map(str::to_string)
            .collect();
        workers.sort();
        workers
    }

    /// The manager's prompt for one round.
    pub fn prompt(&self, runnable: &[ItemId], store: &ResultStore, round: u32) -> AggregatedInput {
        let mut task = String::from(
            "You coordinate a team. Pick the next work item and the worker that should do it.\n\nRunnable items:",
        );
        for id in runnable {
            let Some(item) = self.graph.get(id) else {
                continue;
            };
            task.push_str(&format!("\n- {id}"));
            if !item.name.is_empty() && item.name != item.id {
                task.push_str(&format!(" ({})", item.name));
            }
            if !item.description.trim().is_empty() {
                task.push_str(&format!(": {}", item.description.trim()));
            }
            if let Some(worker) = self.graph.worker_for(item) {
                task.push_str(&format!(" [suggested worker: {worker}]"));
            }
        }

        task.push_str("\n\nAvailable workers:");
        for worker in self.assignable_workers() {
            task.push_str(&format!("\n- {worker}"));
        }

        let done: Vec<&str> = store
            .iter()
            .filter(|(_, record)| record.status == ItemStatus::Completed)
            .map(|(id, _)| id.as_str())
            .collect();
        if !done.is_empty() {
            task.push_str(&format!("\n\nAlready completed: {}", done.join(", ")));
        }

        let mut input = AggregatedInput::from_task(MANAGER_ITEM, task);
        input.expected_output = Some(
            r#"A JSON object {"item": "<id>", "worker": "<name>"} and nothing else."#.to_string(),
        );
        debug!(round, runnable = ?runnable, "manager prompt assembled");
        input
    }

    /// Ask the manager. Invalid answers are retried with feedback under the
    /// manager's retry policy; once that is exhausted (or the manager
    /// worker is missing) the choice falls back to [`Manager::fallback`].
    ///
    /// Returns `None` only when `runnable` is empty.
    pub async fn choose(
        &self,
        runnable: &[ItemId],
        store: &ResultStore,
        round: u32,
        cancel: &CancellationToken,
    ) -> Option<Choice> {
        let first = runnable.first()?;

        let Some(worker) = self.roster.get_worker(&self.spec.worker) else {
            warn!(manager = %self.spec.worker, "manager worker is not registered; using declaration order");
            return self.fallback(first);
        };

        let validator = ChoiceValidator {
            runnable: runnable.to_vec(),
            workers: self.assignable_workers(),
        };
        let input = self.prompt(runnable, store, round);
        let schema = OutputSchema::None;

        let target = GuardTarget {
            item: MANAGER_ITEM,
            name: MANAGER_ITEM,
            attempt: round,
            retry: &self.spec.retry,
            schema: &schema,
        };
        let call = GuardCall {
            worker: worker.as_ref(),
            worker_name: &self.spec.worker,
            validator: Some(&validator),
            tools: &[],
            cancel,
        };

        let outcome = guard::run_once(target, &input, call).await;
        if let Some(ref err) = outcome.error {
            warn!(round, error = %err, "manager gave no usable choice; using declaration order");
            return self.fallback(first);
        }

        let parsed = extract_json(&outcome.raw_text)
            .ok()
            .and_then(|value| serde_json::from_value::<RawChoice>(value).ok());
        match parsed {
            Some(raw) => {
                info!(round, item = %raw.item, worker = %raw.worker, "manager chose");
                Some(Choice {
                    item: raw.item,
                    worker: raw.worker,
                })
            }
            None => self.fallback(first),
        }
    }

    /// Declaration order: the first runnable item with its own worker, else
    /// the process default, else the first assignable worker.
    pub fn fallback(&self, first: &ItemId) -> Option<Choice> {
        let item = self.graph.get(first)?;
        let worker = self
            .graph
            .worker_for(item)
            .filter(|w| *w != self.spec.worker && self.roster.has_worker(w))
            .map(str::to_string)
            .or_else(|| self.assignable_workers().into_iter().next())?;

        Some(Choice {
            item: item.id.clone(),
            worker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> ChoiceValidator {
        ChoiceValidator {
            runnable: vec!["a".into(), "b".into()],
            workers: vec!["writer".into()],
        }
    }

    #[test]
    fn accepts_fenced_choice_and_normalizes_it() {
        let verdict = validator().check("```json\n{\"item\": \"b\", \"worker\": \"writer\"}\n```");
        assert_eq!(
            verdict,
            Verdict::replace(r#"{"item":"b","worker":"writer"}"#)
        );
    }

    #[test]
    fn rejects_unknown_item_and_worker() {
        let v = validator();
        assert!(matches!(
            v.check(r#"{"item": "zzz", "worker": "writer"}"#),
            Verdict::Reject { reason } if reason.contains("not runnable")
        ));
        assert!(matches!(
            v.check(r#"{"item": "a", "worker": "manager"}"#),
            Verdict::Reject { reason } if reason.contains("not an available worker")
        ));
        assert!(matches!(v.check("a please"), Verdict::Reject { .. }));
    }
}

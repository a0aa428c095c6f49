// src/exec/roster.rs

//! The explicit set of collaborators a [`crate::process::Process`] may use.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::model::WorkerConfig;
use crate::context::Retriever;
use crate::errors::Result;
use crate::exec::command::CommandWorker;
use crate::exec::tools::{ToolRef, ToolRegistry};
use crate::exec::validator::Validator;
use crate::exec::worker::Worker;

/// Named workers, validators and tools, plus an optional retriever.
///
/// Work items refer to all of these by name; nothing is looked up from
/// global state.
#[derive(Clone, Default)]
pub struct Roster {
    workers: BTreeMap<String, Arc<dyn Worker>>,
    validators: BTreeMap<String, Arc<dyn Validator>>,
    tools: ToolRegistry,
    retriever: Option<Arc<dyn Retriever>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register command workers declared in a graph file.
    pub fn from_worker_configs(configs: &BTreeMap<String, WorkerConfig>) -> Result<Self> {
        let mut roster = Self::new();
        for (name, cfg) in configs.iter() {
            roster = roster.worker(name.clone(), CommandWorker::from_config(name, cfg)?);
        }
        Ok(roster)
    }

    pub fn worker(self, name: impl Into<String>, worker: impl Worker + 'static) -> Self {
        self.worker_arc(name, Arc::new(worker))
    }

    pub fn worker_arc(mut self, name: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        self.workers.insert(name.into(), worker);
        self
    }

    pub fn validator(self, name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        self.validator_arc(name, Arc::new(validator))
    }

    pub fn validator_arc(mut self, name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.validators.insert(name.into(), validator);
        self
    }

    pub fn tool(mut self, tool: ToolRef) -> Self {
        self.tools.register(tool);
        self
    }

    pub fn retriever(mut self, retriever: impl Retriever + 'static) -> Self {
        self.retriever = Some(Arc::new(retriever));
        self
    }

    /// Merge `other` into `self`; entries in `other` win on name clashes.
    pub fn merge(mut self, other: Roster) -> Self {
        self.workers.extend(other.workers);
        self.validators.extend(other.validators);
        for name in other.tools.names() {
            if let Some(tool) = other.tools.get(name) {
                self.tools.register(tool.clone());
            }
        }
        if other.retriever.is_some() {
            self.retriever = other.retriever;
        }
        self
    }

    pub fn get_worker(&self, name: &str) -> Option<&Arc<dyn Worker>> {
        self.workers.get(name)
    }

    pub fn get_validator(&self, name: &str) -> Option<&Arc<dyn Validator>> {
        self.validators.get(name)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn get_retriever(&self) -> Option<&dyn Retriever> {
        self.retriever.as_deref()
    }

    pub fn has_worker(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    pub fn has_validator(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Registered worker names, sorted.
    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.workers.keys().map(String::as_str)
    }
}

impl fmt::Debug for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Roster")
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .field("tools", &self.tools)
            .field("retriever", &self.retriever.is_some())
            .finish()
    }
}

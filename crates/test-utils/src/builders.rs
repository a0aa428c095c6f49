#![allow(dead_code)]

use std::collections::BTreeMap;

use flowdag::config::model::RawItemKind;
use flowdag::config::{GraphFile, RawGraphFile, RawWorkItem, RetrySection, WorkerConfig};
use flowdag::types::{ConcurrencyHint, Topology};

/// Builder for `GraphFile` to simplify test setup.
///
/// Goes through the same `TryFrom<RawGraphFile>` validation as files read
/// from disk.
pub struct GraphFileBuilder {
    file: RawGraphFile,
}

impl GraphFileBuilder {
    pub fn new(topology: Topology) -> Self {
        let mut file = RawGraphFile::default();
        file.process.topology = topology;
        Self { file }
    }

    pub fn with_item(mut self, item: RawWorkItem) -> Self {
        self.file.item.push(item);
        self
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.file.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_worker(mut self, name: &str, cmd: &str) -> Self {
        self.file.worker.insert(
            name.to_string(),
            WorkerConfig {
                cmd: cmd.to_string(),
                timeout: None,
                env: BTreeMap::new(),
            },
        );
        self
    }

    pub fn default_worker(mut self, name: &str) -> Self {
        self.file.process.default_worker = Some(name.to_string());
        self
    }

    pub fn manager(mut self, name: &str) -> Self {
        self.file.process.manager = Some(name.to_string());
        self
    }

    pub fn max_iterations(mut self, n: u32) -> Self {
        self.file.process.max_iterations = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.file.defaults.retry.max_retries = Some(n);
        self
    }

    pub fn raw(self) -> RawGraphFile {
        self.file
    }

    pub fn build(self) -> GraphFile {
        GraphFile::try_from(self.file).expect("Failed to build valid graph from builder")
    }
}

/// Builder for `RawWorkItem`.
pub struct ItemBuilder {
    item: RawWorkItem,
}

impl ItemBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            item: RawWorkItem {
                id: Some(id.to_string()),
                ..RawWorkItem::default()
            },
        }
    }

    pub fn describe(mut self, text: &str) -> Self {
        self.item.description = text.to_string();
        self
    }

    pub fn worker(mut self, name: &str) -> Self {
        self.item.worker = Some(name.to_string());
        self
    }

    pub fn context(mut self, dep: &str) -> Self {
        self.item.context.push(dep.to_string());
        self
    }

    pub fn then(mut self, next: &str) -> Self {
        self.item.successors.push(next.to_string());
        self
    }

    pub fn entry(mut self) -> Self {
        self.item.entry = true;
        self
    }

    pub fn concurrent(mut self) -> Self {
        self.item.concurrency = Some(ConcurrencyHint::Async);
        self
    }

    pub fn decision(mut self, arms: &[(&str, &[&str])]) -> Self {
        self.item.kind = RawItemKind::Decision;
        self.item.branches = Some(table(arms));
        self
    }

    pub fn looping(mut self, arms: &[(&str, &[&str])]) -> Self {
        self.item.kind = RawItemKind::Loop;
        self.item.branches = Some(table(arms));
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.item
            .retry
            .get_or_insert_with(RetrySection::default)
            .max_retries = Some(n);
        self
    }

    pub fn skip_on_failure(mut self) -> Self {
        self.item
            .retry
            .get_or_insert_with(RetrySection::default)
            .skip_on_failure = Some(true);
        self
    }

    pub fn build(self) -> RawWorkItem {
        self.item
    }
}

fn table(arms: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    arms.iter()
        .map(|(key, next)| {
            (
                key.to_string(),
                next.iter().map(|s| s.to_string()).collect(),
            )
        })
        .collect()
}

// src/store.rs

//! Result Store: per-item status and the outcomes of every attempt.
//!
//! The store is owned by the [`crate::dag::Scheduler`]. Workers never touch
//! it; they report outcomes back over the runtime event channel and the
//! scheduler writes them here.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::errors::ItemError;
use crate::types::{ItemId, ItemStatus, ParsedFormat};

/// The result of one attempt of a work item.
///
/// Carries no timing information, so a deterministic worker always yields
/// identical outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub raw_text: String,
    pub parsed_format: ParsedFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
    /// Worker invocations spent on this attempt (retries included).
    pub invocations: u32,
    /// Worker that produced the outcome, if one was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Outcome {
    pub fn success(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            parsed_format: ParsedFormat::Raw,
            parsed_value: None,
            error: None,
            invocations: 1,
            worker: None,
        }
    }

    pub fn failure(error: ItemError) -> Self {
        Self {
            raw_text: String::new(),
            parsed_format: ParsedFormat::Raw,
            parsed_value: None,
            error: Some(error),
            invocations: 0,
            worker: None,
        }
    }

    pub fn with_invocations(mut self, n: u32) -> Self {
        self.invocations = n;
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Text a downstream item sees when this outcome is used as context.
    ///
    /// Falls back to the compact JSON rendering of the parsed value when the
    /// raw text is empty.
    pub fn context_text(&self) -> String {
        if !self.raw_text.trim().is_empty() {
            return self.raw_text.clone();
        }
        match self.parsed_value {
            Some(ref value) => value.to_string(),
            None => String::new(),
        }
    }
}

/// Status and attempt history of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRecord {
    pub status: ItemStatus,
    /// Number of attempts started so far.
    pub attempt: u32,
    /// Outcomes of finished attempts, oldest first.
    pub outcomes: Vec<Outcome>,
}

impl ItemRecord {
    fn new() -> Self {
        Self {
            status: ItemStatus::NotStarted,
            attempt: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&Outcome> {
        self.outcomes.last()
    }
}

/// Mapping from item id to [`ItemRecord`], ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultStore {
    records: BTreeMap<ItemId, ItemRecord>,
}

impl ResultStore {
    /// A store with a `NotStarted` record for each id.
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a ItemId>) -> Self {
        let records = ids
            .into_iter()
            .map(|id| (id.clone(), ItemRecord::new()))
            .collect();
        Self { records }
    }

    pub fn record(&self, id: &str) -> Option<&ItemRecord> {
        self.records.get(id)
    }

    pub fn status(&self, id: &str) -> Option<ItemStatus> {
        self.records.get(id).map(|r| r.status)
    }

    pub fn attempt(&self, id: &str) -> u32 {
        self.records.get(id).map(|r| r.attempt).unwrap_or(0)
    }

    /// Latest outcome of an item, if any attempt finished.
    pub fn latest(&self, id: &str) -> Option<&Outcome> {
        self.records.get(id).and_then(|r| r.latest())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &ItemRecord)> {
        self.records.iter()
    }

    pub fn count_with_status(&self, status: ItemStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    /// Start a new attempt: `NotStarted -> InProgress`. Returns the 1-based
    /// attempt number, or `None` if the item is unknown or not `NotStarted`.
    pub(crate) fn begin_attempt(&mut self, id: &str) -> Option<u32> {
        let record = self.records.get_mut(id)?;
        if record.status != ItemStatus::NotStarted {
            return None;
        }
        record.status = ItemStatus::InProgress;
        record.attempt += 1;
        Some(record.attempt)
    }

    /// Close the current attempt with `outcome`. The status follows the
    /// outcome's error.
    pub(crate) fn finish_attempt(&mut self, id: &str, outcome: Outcome) -> Option<ItemStatus> {
        let record = self.records.get_mut(id)?;
        record.status = if outcome.is_success() {
            ItemStatus::Completed
        } else {
            ItemStatus::Failed
        };
        record.outcomes.push(outcome);
        Some(record.status)
    }

    /// Turn the latest outcome of a finished attempt into a failure.
    ///
    /// Used when routing rejects an otherwise successful outcome (unmatched
    /// branch, iteration limit). The raw text is kept.
    pub(crate) fn fail_latest(&mut self, id: &str, error: ItemError) {
        if let Some(record) = self.records.get_mut(id) {
            record.status = ItemStatus::Failed;
            match record.outcomes.last_mut() {
                Some(outcome) => outcome.error = Some(error),
                None => record.outcomes.push(Outcome::failure(error)),
            }
        }
    }

    /// Open the item for another attempt: terminal -> `NotStarted`.
    pub(crate) fn reopen(&mut self, id: &str) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.status.is_terminal() => {
                record.status = ItemStatus::NotStarted;
                true
            }
            _ => false,
        }
    }
}

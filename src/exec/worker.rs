// src/exec/worker.rs

//! The executor boundary: something that turns an input string into an
//! output string.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::dag::work_item::OutputSchema;
use crate::exec::tools::ToolRef;
use crate::types::{BoxFuture, ItemId};

/// One worker invocation.
#[derive(Debug, Clone)]
pub struct WorkRequest {
    pub item: ItemId,
    /// Human label of the item.
    pub name: String,
    /// 1-based attempt of the item (loop re-entries increment it).
    pub attempt: u32,
    /// 1-based invocation within the attempt (retries increment it).
    pub invocation: u32,
    /// Rendered aggregated input.
    pub input: String,
    pub schema: OutputSchema,
    /// Tools the item is allowed to use.
    pub tools: Vec<ToolRef>,
    /// Fires when the run is cancelled. Long-running workers should watch it.
    pub cancel: CancellationToken,
}

impl WorkRequest {
    /// A bare request, mostly for calling workers outside a run.
    pub fn new(item: impl Into<ItemId>, input: impl Into<String>) -> Self {
        let item = item.into();
        Self {
            name: item.clone(),
            item,
            attempt: 1,
            invocation: 1,
            input: input.into(),
            schema: OutputSchema::None,
            tools: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("{0}")]
    Failed(String),

    #[error("worker timed out after {0:?}")]
    Timeout(Duration),

    #[error("worker cancelled")]
    Cancelled,

    #[error("worker IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WorkerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        WorkerError::Failed(msg.into())
    }
}

/// An executor of work items (a model-backed agent, a shell command, a
/// test double, ...).
pub trait Worker: Send + Sync {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>>;
}

/// Adapts an async closure into a [`Worker`].
pub struct FnWorker<F> {
    f: F,
}

impl<F, Fut> FnWorker<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, WorkerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, WorkerError>> + Send + 'static,
{
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        Box::pin((self.f)(request))
    }
}

impl<F> fmt::Debug for FnWorker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorker").finish_non_exhaustive()
    }
}

// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning work
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation here.
//!
//! - [`PooledBackend`] is the default implementation. Every dispatched item
//!   runs in its own Tokio task, bounded by a semaphore, and reports back
//!   with a `RuntimeEvent::ItemFinished`.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which items were scheduled and emits canned outcomes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::context::enrich;
use crate::dag::ScheduledItem;
use crate::engine::RuntimeEvent;
use crate::errors::{ItemError, Result};
use crate::exec::guard::{self, GuardCall, GuardTarget};
use crate::exec::roster::Roster;
use crate::store::Outcome;

/// Trait abstracting how scheduled items are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given batch for execution.
    ///
    /// Implementations must eventually send one `ItemFinished` event per
    /// item back to the runtime.
    fn dispatch(
        &mut self,
        batch: Vec<ScheduledItem>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Production backend: one Tokio task per item, at most `max_concurrency`
/// worker calls in flight.
pub struct PooledBackend {
    roster: Arc<Roster>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl PooledBackend {
    pub fn new(
        roster: Arc<Roster>,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        max_concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            roster,
            runtime_tx,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            cancel,
        }
    }
}

impl ExecutorBackend for PooledBackend {
    fn dispatch(
        &mut self,
        batch: Vec<ScheduledItem>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for item in batch {
                let roster = Arc::clone(&self.roster);
                let permits = Arc::clone(&self.permits);
                let cancel = self.cancel.clone();
                let tx = self.runtime_tx.clone();

                tokio::spawn(async move {
                    let outcome = match permits.acquire_owned().await {
                        Ok(_permit) => execute_item(&roster, &item, &cancel).await,
                        Err(_) => Outcome::failure(ItemError::Cancelled),
                    };

                    let event = RuntimeEvent::ItemFinished {
                        item: item.id.clone(),
                        attempt: item.attempt,
                        outcome,
                    };
                    if tx.send(event).await.is_err() {
                        debug!(item = %item.id, "runtime gone before item reported back");
                    }
                });
            }
            Ok(())
        })
    }
}

/// Resolve an item's collaborators from the roster, enrich its input and run
/// it through the guard.
///
/// Resolution problems (unknown worker, validator or tool) become a failed
/// outcome rather than an error, so a single misconfigured item cannot take
/// the run down.
pub async fn execute_item(
    roster: &Roster,
    item: &ScheduledItem,
    cancel: &CancellationToken,
) -> Outcome {
    let Some(worker_name) = item.worker.as_deref() else {
        return resolution_failure(item, "no worker assigned".to_string());
    };
    let Some(worker) = roster.get_worker(worker_name) else {
        return resolution_failure(item, format!("unknown worker '{worker_name}'"));
    };

    let validator = match item.guardrail {
        Some(ref name) => match roster.get_validator(name) {
            Some(v) => Some(v.as_ref()),
            None => return resolution_failure(item, format!("unknown guardrail '{name}'")),
        },
        None => None,
    };

    let tools = match roster.tools().resolve(&item.tools) {
        Ok(tools) => tools,
        Err(e) => return resolution_failure(item, e),
    };

    let mut input = item.input.clone();
    enrich(&mut input, roster.get_retriever()).await;

    let target = GuardTarget {
        item: &item.id,
        name: &item.name,
        attempt: item.attempt,
        retry: &item.retry,
        schema: &item.schema,
    };
    let call = GuardCall {
        worker: worker.as_ref(),
        worker_name,
        validator,
        tools: &tools,
        cancel,
    };

    guard::run_once(target, &input, call).await
}

fn resolution_failure(item: &ScheduledItem, message: String) -> Outcome {
    error!(item = %item.id, error = %message, "cannot execute item");
    Outcome::failure(ItemError::Executor { message })
}

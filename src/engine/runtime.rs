// src/engine/runtime.rs

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::ScheduledItem;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s, and delegates the
/// actual work to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching items to the executor and watching the
/// cancellation token.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    cancel: CancellationToken,
    cancel_grace: Duration,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("cancel_grace", &self.cancel_grace)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        cancel: CancellationToken,
        cancel_grace: Duration,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            cancel,
            cancel_grace,
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run (or cancels it straight away if the token already
    ///   fired).
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   core runtime.
    /// - Executes commands returned by the core.
    /// - Once cancelled, waits at most `cancel_grace` for in-flight items
    ///   before abandoning them.
    ///
    /// Returns the core so the caller can assemble the run report.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        info!("flowdag runtime started");

        let first = if self.cancel.is_cancelled() {
            RuntimeEvent::CancelRequested
        } else {
            RuntimeEvent::RunRequested
        };
        if !self.apply(first).await? {
            return Ok(self.finish());
        }

        let mut grace_deadline: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if grace_deadline.is_none() => {
                    grace_deadline = Some(Instant::now() + self.cancel_grace);
                    RuntimeEvent::CancelRequested
                }

                _ = wait_until(grace_deadline) => {
                    warn!(
                        in_flight = self.core.scheduler().in_flight_count(),
                        "cancellation grace period expired; abandoning in-flight items"
                    );
                    self.core.abandon_in_flight();
                    break;
                }

                received = self.event_rx.recv() => match received {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        self.core.abandon_in_flight();
                        break;
                    }
                },
            };

            debug!(?event, "runtime received event");

            if !self.apply(event).await? {
                break;
            }
        }

        Ok(self.finish())
    }

    /// Feed one event into the core and execute the resulting commands.
    /// Returns whether the loop should keep running.
    async fn apply(&mut self, event: RuntimeEvent) -> Result<bool> {
        let step = self.core.step(event);

        for command in step.commands {
            self.execute_command(command).await?;
        }

        if !step.keep_running {
            info!("core requested exit; stopping runtime");
        }
        Ok(step.keep_running)
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchBatch(batch) => self.dispatch(batch).await?,
            CoreCommand::RequestExit(status) => {
                info!(%status, "core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, batch: Vec<ScheduledItem>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ids: Vec<_> = batch.iter().map(|i| i.id.as_str()).collect();
        debug!(?ids, "dispatching batch");

        self.executor.dispatch(batch).await
    }

    fn finish(self) -> CoreRuntime {
        info!(status = %self.core.run_status(), "runtime exiting");
        self.core
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

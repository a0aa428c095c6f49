#![allow(dead_code)]

//! Test doubles for the `Worker` boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowdag::exec::{WorkRequest, Worker, WorkerError};
use flowdag::types::BoxFuture;

/// One recorded worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub item: String,
    pub attempt: u32,
    pub invocation: u32,
    pub input: String,
}

impl Call {
    fn from_request(req: &WorkRequest) -> Self {
        Self {
            item: req.item.clone(),
            attempt: req.attempt,
            invocation: req.invocation,
            input: req.input.clone(),
        }
    }
}

/// Shared, cloneable log of invocations.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn for_item(&self, item: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.item == item)
            .collect()
    }

    /// Item ids in call order.
    pub fn items(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.item).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A worker that answers from a per-item script.
///
/// Each item has a queue of replies; `Ok` is returned as output and `Err` as
/// a `WorkerError::Failed`. Once an item's queue is empty the worker answers
/// `"<item> done"`.
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorker {
    script: Arc<Mutex<HashMap<String, VecDeque<Result<String, String>>>>>,
    log: CallLog,
}

impl ScriptedWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, item: &str, output: &str) -> Self {
        self.push(item, Ok(output.to_string()));
        self
    }

    pub fn fail(self, item: &str, message: &str) -> Self {
        self.push(item, Err(message.to_string()));
        self
    }

    /// Queue the same reply `n` times.
    pub fn reply_n(self, item: &str, output: &str, n: usize) -> Self {
        for _ in 0..n {
            self.push(item, Ok(output.to_string()));
        }
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn push(&self, item: &str, reply: Result<String, String>) {
        self.script
            .lock()
            .unwrap()
            .entry(item.to_string())
            .or_default()
            .push_back(reply);
    }

    fn next_reply(&self, item: &str) -> Result<String, String> {
        self.script
            .lock()
            .unwrap()
            .get_mut(item)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(format!("{item} done")))
    }
}

impl Worker for ScriptedWorker {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        self.log.push(Call::from_request(&request));
        let reply = self.next_reply(&request.item);
        Box::pin(async move { reply.map_err(WorkerError::Failed) })
    }
}

/// Returns its input unchanged.
#[derive(Debug, Clone, Default)]
pub struct EchoWorker {
    log: CallLog,
}

impl EchoWorker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Worker for EchoWorker {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        self.log.push(Call::from_request(&request));
        Box::pin(async move { Ok(request.input) })
    }
}

/// Always fails with the same message.
#[derive(Debug, Clone)]
pub struct FailingWorker {
    message: String,
    log: CallLog,
}

impl FailingWorker {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            log: CallLog::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }
}

impl Worker for FailingWorker {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        self.log.push(Call::from_request(&request));
        let message = self.message.clone();
        Box::pin(async move { Err(WorkerError::Failed(message)) })
    }
}

/// Sleeps before answering `"<item> done"`; honours the request's
/// cancellation token. Tracks peak concurrency.
#[derive(Debug, Clone)]
pub struct SlowWorker {
    delay: Duration,
    log: CallLog,
    running: Arc<Mutex<(usize, usize)>>,
}

impl SlowWorker {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            log: CallLog::default(),
            running: Arc::new(Mutex::new((0, 0))),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Highest number of simultaneous invocations observed.
    pub fn peak(&self) -> usize {
        self.running.lock().unwrap().1
    }
}

impl Worker for SlowWorker {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        self.log.push(Call::from_request(&request));
        Box::pin(async move {
            {
                let mut running = self.running.lock().unwrap();
                running.0 += 1;
                running.1 = running.1.max(running.0);
            }

            let result = tokio::select! {
                _ = request.cancel.cancelled() => Err(WorkerError::Cancelled),
                _ = tokio::time::sleep(self.delay) => Ok(format!("{} done", request.item)),
            };

            self.running.lock().unwrap().0 -= 1;
            result
        })
    }
}

/// Ignores cancellation entirely and never answers.
#[derive(Debug, Clone, Default)]
pub struct StuckWorker;

impl Worker for StuckWorker {
    fn execute(&self, _request: WorkRequest) -> BoxFuture<'_, Result<String, WorkerError>> {
        Box::pin(std::future::pending())
    }
}

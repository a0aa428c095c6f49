use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use flowdag::dag::ScheduledItem;
use flowdag::engine::RuntimeEvent;
use flowdag::errors::{ItemError, Result};
use flowdag::exec::ExecutorBackend;
use flowdag::store::Outcome;

/// A fake executor that:
/// - records which items were dispatched, batch by batch
/// - immediately reports an outcome for each: the next scripted one for
///   that item, else `Outcome::success("<item> done")`.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    batches: Arc<Mutex<Vec<Vec<String>>>>,
    inputs: Arc<Mutex<Vec<(String, String)>>>,
    script: HashMap<String, VecDeque<Outcome>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        batches: Arc<Mutex<Vec<Vec<String>>>>,
    ) -> Self {
        Self {
            runtime_tx,
            batches,
            inputs: Arc::new(Mutex::new(Vec::new())),
            script: HashMap::new(),
        }
    }

    pub fn reply(mut self, item: &str, output: &str) -> Self {
        self.script
            .entry(item.to_string())
            .or_default()
            .push_back(Outcome::success(output));
        self
    }

    pub fn fail(mut self, item: &str, message: &str) -> Self {
        self.script
            .entry(item.to_string())
            .or_default()
            .push_back(Outcome::failure(ItemError::Executor {
                message: message.to_string(),
            }));
        self
    }

    /// `(item, rendered input)` for every dispatched item.
    pub fn inputs(&self) -> Arc<Mutex<Vec<(String, String)>>> {
        Arc::clone(&self.inputs)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        batch: Vec<ScheduledItem>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();

        Box::pin(async move {
            {
                let mut guard = self.batches.lock().unwrap();
                guard.push(batch.iter().map(|i| i.id.clone()).collect());
            }

            for item in batch {
                self.inputs
                    .lock()
                    .unwrap()
                    .push((item.id.clone(), item.input.render()));

                let outcome = self
                    .script
                    .get_mut(&item.id)
                    .and_then(VecDeque::pop_front)
                    .unwrap_or_else(|| Outcome::success(format!("{} done", item.id)));

                tx.send(RuntimeEvent::ItemFinished {
                    item: item.id.clone(),
                    attempt: item.attempt,
                    outcome,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}

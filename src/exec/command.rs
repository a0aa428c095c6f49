// src/exec/command.rs

//! Shell-command worker.
//!
//! Runs `sh -c <cmd>` (or `cmd /C` on Windows), writes the rendered input to
//! the child's stdin and returns its stdout. A non-zero exit status is a
//! worker failure; stderr is logged at debug level.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::duration::parse_duration;
use crate::config::model::WorkerConfig;
use crate::errors::{FlowdagError, Result};
use crate::exec::worker::{WorkRequest, Worker, WorkerError};
use crate::types::BoxFuture;

#[derive(Debug, Clone)]
pub struct CommandWorker {
    name: String,
    cmd: String,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
}

impl CommandWorker {
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            timeout: None,
            env: BTreeMap::new(),
        }
    }

    pub fn from_config(name: &str, cfg: &WorkerConfig) -> Result<Self> {
        let timeout = cfg
            .timeout
            .as_deref()
            .map(parse_duration)
            .transpose()
            .map_err(|e| FlowdagError::config(format!("worker '{name}': invalid `timeout`: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            cmd: cfg.cmd.clone(),
            timeout,
            env: cfg.env.clone(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn command(&self, request: &WorkRequest) -> Command {
        // Build a shell command appropriate for the platform.
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.envs(self.env.iter())
            .env("FLOWDAG_ITEM", &request.item)
            .env("FLOWDAG_ATTEMPT", request.attempt.to_string())
            .env("FLOWDAG_INVOCATION", request.invocation.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: WorkRequest) -> std::result::Result<String, WorkerError> {
        info!(
            worker = %self.name,
            item = %request.item,
            attempt = request.attempt,
            cmd = %self.cmd,
            "starting worker process"
        );

        let mut child = self
            .command(&request)
            .spawn()
            .with_context(|| format!("spawning process for worker '{}'", self.name))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = request.input.clone();
            let worker = self.name.clone();
            // Write from a separate task so a child that never reads stdin
            // cannot block us.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(worker = %worker, error = %e, "child closed stdin early");
                }
            });
        }

        // Always consume stderr so buffers don't fill; log at debug.
        if let Some(stderr) = child.stderr.take() {
            let worker = self.name.clone();
            let item = request.item.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();

                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = %worker, item = %item, "stderr: {}", line);
                }
            });
        }

        let mut stdout = child
            .stdout
            .take()
            .context("child stdout was not captured")?;

        let read_and_wait = async {
            let mut out = String::new();
            stdout.read_to_string(&mut out).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, status))
        };

        let timeout = async {
            match self.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Either the process exits on its own (normal case), the run is
        // cancelled, or the timeout fires. In the latter two cases the child
        // is killed when dropped.
        tokio::select! {
            res = read_and_wait => {
                let (out, status) = res?;
                let code = status.code().unwrap_or(-1);

                info!(
                    worker = %self.name,
                    item = %request.item,
                    exit_code = code,
                    success = status.success(),
                    "worker process exited"
                );

                if status.success() {
                    Ok(out.trim_end().to_string())
                } else {
                    Err(WorkerError::failed(format!(
                        "command `{}` exited with code {code}",
                        self.cmd
                    )))
                }
            }
            _ = request.cancel.cancelled() => {
                info!(
                    worker = %self.name,
                    item = %request.item,
                    "run cancelled; killing worker process"
                );
                Err(WorkerError::Cancelled)
            }
            _ = timeout => {
                warn!(
                    worker = %self.name,
                    item = %request.item,
                    timeout = ?self.timeout,
                    "worker process timed out; killing it"
                );
                Err(WorkerError::Timeout(self.timeout.unwrap_or_default()))
            }
        }
    }
}

impl Worker for CommandWorker {
    fn execute(&self, request: WorkRequest) -> BoxFuture<'_, std::result::Result<String, WorkerError>> {
        Box::pin(self.run(request))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_stdin_to_stdout() {
        let worker = CommandWorker::new("cat", "cat");
        let out = worker
            .execute(WorkRequest::new("a", "hello from stdin"))
            .await
            .unwrap();
        assert_eq!(out, "hello from stdin");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let worker = CommandWorker::new("fail", "echo nope; exit 3");
        let err = worker.execute(WorkRequest::new("a", "")).await.unwrap_err();
        assert!(err.to_string().contains("code 3"));
    }

    #[tokio::test]
    async fn item_id_is_exported() {
        let worker = CommandWorker::new("env", "printf '%s' \"$FLOWDAG_ITEM\"");
        let out = worker.execute(WorkRequest::new("draft", "")).await.unwrap();
        assert_eq!(out, "draft");
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let worker = CommandWorker::new("slow", "sleep 5").with_timeout(Duration::from_millis(50));
        let err = worker.execute(WorkRequest::new("a", "")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let worker = CommandWorker::new("slow", "sleep 5");
        let request = WorkRequest::new("a", "");
        let cancel = request.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = worker.execute(request).await.unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }
}

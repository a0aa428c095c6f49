// src/exec/guard.rs

//! Retry/Guardrail Controller.
//!
//! Wraps one attempt of a work item: invokes the worker, applies the
//! item's validator, retries within the item's budget and finally parses
//! the accepted output.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::AggregatedInput;
use crate::dag::work_item::{OutputSchema, RetryPolicy};
use crate::errors::ItemError;
use crate::exec::parse::{Parsed, parse_output};
use crate::exec::tools::ToolRef;
use crate::exec::validator::{Validator, Verdict};
use crate::exec::worker::{WorkRequest, Worker, WorkerError};
use crate::store::Outcome;

/// What is being attempted.
#[derive(Debug, Clone, Copy)]
pub struct GuardTarget<'a> {
    pub item: &'a str,
    pub name: &'a str,
    pub attempt: u32,
    pub retry: &'a RetryPolicy,
    pub schema: &'a OutputSchema,
}

/// Who does the work, and what they may use.
#[derive(Clone, Copy)]
pub struct GuardCall<'a> {
    pub worker: &'a dyn Worker,
    pub worker_name: &'a str,
    pub validator: Option<&'a dyn Validator>,
    pub tools: &'a [ToolRef],
    pub cancel: &'a CancellationToken,
}

/// Run one attempt under the retry policy and return its outcome.
///
/// Executor errors and validator rejections draw from the same budget of
/// `max_retries + 1` invocations. Executor errors wait `delay_for(n)` before
/// the next invocation and reuse the input; rejections re-invoke at once
/// with the reason appended as feedback.
pub async fn run_once(
    target: GuardTarget<'_>,
    input: &AggregatedInput,
    call: GuardCall<'_>,
) -> Outcome {
    let budget = target.retry.max_invocations();
    let mut feedback: Option<String> = None;
    let mut last_error = ItemError::Executor {
        message: "worker was never invoked".to_string(),
    };

    for invocation in 1..=budget {
        if call.cancel.is_cancelled() {
            return cancelled(call, invocation - 1);
        }

        let current = match feedback {
            Some(ref reason) => input.with_feedback(reason.as_str()),
            None => input.clone(),
        };

        let request = WorkRequest {
            item: target.item.to_string(),
            name: target.name.to_string(),
            attempt: target.attempt,
            invocation,
            input: current.render(),
            schema: target.schema.clone(),
            tools: call.tools.to_vec(),
            cancel: call.cancel.clone(),
        };

        debug!(
            item = %target.item,
            attempt = target.attempt,
            invocation,
            worker = %call.worker_name,
            "invoking worker"
        );

        let result = tokio::select! {
            biased;
            _ = call.cancel.cancelled() => Err(WorkerError::Cancelled),
            r = call.worker.execute(request) => r,
        };

        match result {
            Ok(raw) => {
                let verdict = match call.validator {
                    Some(validator) => tokio::select! {
                        biased;
                        _ = call.cancel.cancelled() => return cancelled(call, invocation),
                        v = validator.validate(&current, &raw) => v,
                    },
                    None => Verdict::accept(),
                };

                match verdict {
                    Verdict::Accept { output } => {
                        let text = output.unwrap_or(raw);
                        return accepted(target, call, text, invocation);
                    }
                    Verdict::Reject { reason } => {
                        warn!(
                            item = %target.item,
                            attempt = target.attempt,
                            invocation,
                            reason = %reason,
                            "output rejected by guardrail"
                        );
                        last_error = ItemError::Validation {
                            reason: reason.clone(),
                        };
                        feedback = Some(reason);
                    }
                }
            }
            Err(WorkerError::Cancelled) => {
                return cancelled(call, invocation);
            }
            Err(err) => {
                warn!(
                    item = %target.item,
                    attempt = target.attempt,
                    invocation,
                    error = %err,
                    "worker invocation failed"
                );
                last_error = ItemError::Executor {
                    message: err.to_string(),
                };

                if invocation < budget {
                    let delay = target.retry.delay_for(invocation - 1);
                    if !delay.is_zero() {
                        debug!(item = %target.item, ?delay, "waiting before retry");
                        tokio::select! {
                            biased;
                            _ = call.cancel.cancelled() => return cancelled(call, invocation),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }
    }

    warn!(
        item = %target.item,
        attempt = target.attempt,
        invocations = budget,
        error = %last_error,
        "retry budget exhausted"
    );

    Outcome::failure(last_error)
        .with_invocations(budget)
        .with_worker(call.worker_name)
}

fn accepted(target: GuardTarget<'_>, call: GuardCall<'_>, text: String, invocations: u32) -> Outcome {
    let parsed = match parse_output(&text, target.schema) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!(
                item = %target.item,
                reason = %reason,
                "output does not match its schema; keeping raw text"
            );
            Parsed::raw()
        }
    };

    info!(
        item = %target.item,
        attempt = target.attempt,
        invocations,
        format = ?parsed.format,
        "item output accepted"
    );

    Outcome {
        raw_text: text,
        parsed_format: parsed.format,
        parsed_value: parsed.value,
        error: None,
        invocations,
        worker: Some(call.worker_name.to_string()),
    }
}

fn cancelled(call: GuardCall<'_>, invocations: u32) -> Outcome {
    Outcome::failure(ItemError::Cancelled)
        .with_invocations(invocations)
        .with_worker(call.worker_name)
}

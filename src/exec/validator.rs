// src/exec/validator.rs

//! Guardrails: checks applied to a worker's output before it is accepted.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::context::AggregatedInput;
use crate::exec::worker::{WorkRequest, Worker};
use crate::types::BoxFuture;

/// Decision of a [`Validator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Accept the output. `output` replaces it when set.
    Accept { output: Option<String> },
    /// Reject the output; `reason` is fed back to the worker.
    Reject { reason: String },
}

impl Verdict {
    pub fn accept() -> Self {
        Verdict::Accept { output: None }
    }

    pub fn replace(output: impl Into<String>) -> Self {
        Verdict::Accept {
            output: Some(output.into()),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Verdict::Reject {
            reason: reason.into(),
        }
    }
}

pub trait Validator: Send + Sync {
    fn validate<'a>(
        &'a self,
        input: &'a AggregatedInput,
        output: &'a str,
    ) -> BoxFuture<'a, Verdict>;
}

/// Adapts a synchronous closure into a [`Validator`].
pub struct FnValidator<F> {
    f: F,
}

impl<F> FnValidator<F>
where
    F: Fn(&AggregatedInput, &str) -> Verdict + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Validator for FnValidator<F>
where
    F: Fn(&AggregatedInput, &str) -> Verdict + Send + Sync,
{
    fn validate<'a>(
        &'a self,
        input: &'a AggregatedInput,
        output: &'a str,
    ) -> BoxFuture<'a, Verdict> {
        let verdict = (self.f)(input, output);
        Box::pin(async move { verdict })
    }
}

impl<F> fmt::Debug for FnValidator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator").finish_non_exhaustive()
    }
}

/// A validator backed by a second worker call.
///
/// The reviewing worker sees the task, the candidate output and the
/// criteria, and must answer `PASS` or `FAIL: <reason>`. Anything else is a
/// rejection carrying the answer as its reason.
pub struct WorkerValidator {
    worker: Arc<dyn Worker>,
    criteria: String,
}

impl WorkerValidator {
    pub fn new(worker: Arc<dyn Worker>, criteria: impl Into<String>) -> Self {
        Self {
            worker,
            criteria: criteria.into(),
        }
    }

    fn prompt(&self, input: &AggregatedInput, output: &str) -> String {
        format!(
            "Review the output below against the criteria.\n\
             Answer PASS if it meets them, otherwise FAIL: <reason>.\n\n\
             # Criteria\n{}\n\n# Task\n{}\n\n# Output\n{}",
            self.criteria.trim(),
            input.task.trim(),
            output.trim()
        )
    }
}

/// Interpret a reviewer's `PASS` / `FAIL: reason` answer.
pub fn parse_review(answer: &str) -> Verdict {
    let trimmed = answer.trim();
    let upper = trimmed.to_uppercase();

    if upper.starts_with("PASS") {
        return Verdict::accept();
    }

    if upper.starts_with("FAIL") {
        let reason = trimmed.get(4..).unwrap_or("").trim_start_matches([':', ' ', '-']).trim();
        return if reason.is_empty() {
            Verdict::reject("rejected by reviewer")
        } else {
            Verdict::reject(reason)
        };
    }

    Verdict::reject(format!("unrecognized review answer: {trimmed}"))
}

impl Validator for WorkerValidator {
    fn validate<'a>(
        &'a self,
        input: &'a AggregatedInput,
        output: &'a str,
    ) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            let request = WorkRequest::new(input.item.clone(), self.prompt(input, output));

            match self.worker.execute(request).await {
                Ok(answer) => {
                    let verdict = parse_review(&answer);
                    debug!(item = %input.item, ?verdict, "reviewer answered");
                    verdict
                }
                Err(err) => Verdict::reject(format!("reviewer unavailable: {err}")),
            }
        })
    }
}

impl fmt::Debug for WorkerValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerValidator")
            .field("criteria", &self.criteria)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_answers() {
        assert_eq!(parse_review(" pass\n"), Verdict::accept());
        assert_eq!(parse_review("FAIL: too short"), Verdict::reject("too short"));
        assert_eq!(parse_review("FAIL"), Verdict::reject("rejected by reviewer"));
        assert!(matches!(parse_review("maybe"), Verdict::Reject { .. }));
    }
}

// tests/item_failures.rs

use std::error::Error;

use flowdag::ItemError;
use flowdag::context::AggregatedInput;
use flowdag::dag::{ProcessGraph, RetryPolicy, WorkItem};
use flowdag::exec::{FnValidator, FnWorker, Roster, Verdict, WorkRequest, WorkerError};
use flowdag::process::{BlockedItem, Process};
use flowdag::types::{ItemStatus, Topology};
use flowdag_test_utils::workers::{FailingWorker, ScriptedWorker};
use flowdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn failing_executor_stops_after_max_retries_plus_one() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("broken")
        .item(WorkItem::new("a").retry(retries(3)))
        .build()?;

    let worker = FailingWorker::new("boom");
    let log = worker.log();

    let process = Process::new(graph, Roster::new().worker("broken", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(log.len(), 4);
    assert_eq!(report.status_of("a"), Some(ItemStatus::Failed));
    let outcome = report.outcome("a").unwrap();
    assert_eq!(outcome.invocations, 4);
    assert_eq!(
        outcome.error,
        Some(ItemError::Executor {
            message: "boom".to_string()
        })
    );

    // Every invocation saw the same input.
    let inputs: Vec<_> = log.calls().into_iter().map(|c| c.input).collect();
    assert!(inputs.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(report.errors.len(), 1);
    Ok(())
}

#[tokio::test]
async fn validator_feedback_unlocks_success() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("picky")
        .item(
            WorkItem::new("a")
                .describe("write something")
                .guardrail("marker")
                .retry(retries(3)),
        )
        .build()?;

    let worker = FnWorker::new(|req: WorkRequest| async move {
        if req.input.contains("MARKER") {
            Ok::<_, WorkerError>("done with MARKER".to_string())
        } else {
            Ok("done".to_string())
        }
    });
    let validator = FnValidator::new(|_input: &AggregatedInput, output: &str| {
        if output.contains("MARKER") {
            Verdict::accept()
        } else {
            Verdict::reject("mention MARKER")
        }
    });

    let roster = Roster::new()
        .worker("picky", worker)
        .validator("marker", validator);
    let process = Process::new(graph, roster)?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("a"), Some(ItemStatus::Completed));
    let outcome = report.outcome("a").unwrap();
    assert!(outcome.invocations <= 2);
    assert_eq!(outcome.raw_text, "done with MARKER");
    Ok(())
}

#[tokio::test]
async fn exhausted_validation_keeps_last_reason() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("w")
        .item(WorkItem::new("a").guardrail("never").retry(retries(1)))
        .build()?;

    let roster = Roster::new()
        .worker("w", ScriptedWorker::new())
        .validator(
            "never",
            FnValidator::new(|input: &AggregatedInput, _: &str| {
                let n = if input.feedback.is_some() { 2 } else { 1 };
                Verdict::reject(format!("rejection {n}"))
            }),
        );
    let process = Process::new(graph, roster)?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(
        report.outcome("a").unwrap().error,
        Some(ItemError::Validation {
            reason: "rejection 2".to_string()
        })
    );
    Ok(())
}

#[tokio::test]
async fn repeating_loop_fails_after_max_iterations() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("w")
        .max_iterations(3)
        .item(
            WorkItem::looping("L", [("repeat", vec!["L".to_string()]), ("stop", vec![])])?.entry(),
        )
        .build()?;

    let worker = FnWorker::new(|_req: WorkRequest| async move { Ok::<_, WorkerError>("repeat".to_string()) });
    let process = Process::new(graph, Roster::new().worker("w", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("L"), Some(ItemStatus::Failed));
    assert_eq!(report.attempts("L"), 3);
    assert_eq!(report.execution_order.len(), 3);
    assert_eq!(
        report.outcome("L").unwrap().error,
        Some(ItemError::MaxIterationsExceeded { limit: 3 })
    );
    Ok(())
}

#[tokio::test]
async fn loop_threads_previous_output_into_next_attempt() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("w")
        .max_iterations(5)
        .item(
            WorkItem::looping("L", [("again", vec!["L".to_string()]), ("stop", vec![])])?
                .describe("refine")
                .entry(),
        )
        .build()?;

    let worker = ScriptedWorker::new().reply("L", "again").reply("L", "stop");
    let log = worker.log();
    let process = Process::new(graph, Roster::new().worker("w", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("L"), Some(ItemStatus::Completed));
    assert_eq!(report.attempts("L"), 2);

    let calls = log.for_item("L");
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].input.contains("# Previous attempt"));
    assert!(calls[1].input.contains("# Previous attempt\nagain"));
    assert_eq!(calls[1].attempt, 2);
    Ok(())
}

#[tokio::test]
async fn unmatched_classification_leaves_siblings_alone() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("w")
        .item(WorkItem::decision("D", [("yes", vec!["x".to_string()]), ("no", vec![])])?.entry())
        .item(WorkItem::new("x"))
        .item(WorkItem::new("S").entry().then("T"))
        .item(WorkItem::new("T"))
        .build()?;

    let worker = ScriptedWorker::new().reply("D", "maybe");
    let process = Process::new(graph, Roster::new().worker("w", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("D"), Some(ItemStatus::Failed));
    assert!(matches!(
        report.outcome("D").unwrap().error,
        Some(ItemError::BranchResolution { ref classification, .. }) if classification == "maybe"
    ));
    assert_eq!(report.status_of("S"), Some(ItemStatus::Completed));
    assert_eq!(report.status_of("T"), Some(ItemStatus::Completed));
    assert_eq!(report.status_of("x"), Some(ItemStatus::NotStarted));
    Ok(())
}

#[tokio::test]
async fn failed_dependency_blocks_dependents() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("w")
        .item(WorkItem::new("a").retry(retries(0)))
        .item(WorkItem::new("b").depends_on("a"))
        .item(WorkItem::new("c"))
        .build()?;

    let worker = ScriptedWorker::new().fail("a", "nope");
    let process = Process::new(graph, Roster::new().worker("w", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("a"), Some(ItemStatus::Failed));
    assert_eq!(report.status_of("b"), Some(ItemStatus::NotStarted));
    assert_eq!(report.status_of("c"), Some(ItemStatus::Completed));
    assert_eq!(
        report.blocked,
        vec![BlockedItem {
            item: "b".to_string(),
            blocked_by: Some("a".to_string())
        }]
    );
    assert_eq!(flowdag::exit_code(&report), flowdag::EXIT_ITEM_FAILED);
    Ok(())
}

#[tokio::test]
async fn skip_on_failure_lets_dependents_run() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("w")
        .item(
            WorkItem::new("a")
                .entry()
                .then("b")
                .retry(RetryPolicy {
                    max_retries: 0,
                    skip_on_failure: true,
                    ..RetryPolicy::default()
                }),
        )
        .item(WorkItem::new("b").depends_on("a").describe("carry on"))
        .build()?;

    let worker = ScriptedWorker::new().fail("a", "nope");
    let log = worker.log();
    let process = Process::new(graph, Roster::new().worker("w", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("a"), Some(ItemStatus::Failed));
    assert_eq!(report.status_of("b"), Some(ItemStatus::Completed));
    // A failed dependency contributes nothing to the input.
    assert_eq!(log.for_item("b")[0].input, "# Task\ncarry on");
    Ok(())
}

// tests/cancellation.rs

use std::error::Error;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowdag::FlowdagError;
use flowdag::ItemError;
use flowdag::dag::{ProcessGraph, WorkItem};
use flowdag::exec::Roster;
use flowdag::process::{Process, RunOptions};
use flowdag::types::{ItemStatus, RunStatus, Topology};
use flowdag_test_utils::workers::{ScriptedWorker, SlowWorker, StuckWorker};
use flowdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn deadline_returns_partial_results() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .item(WorkItem::new("fast").worker("fast"))
        .item(WorkItem::new("slow").worker("slow"))
        .item(WorkItem::new("never").worker("fast"))
        .build()?;

    let roster = Roster::new()
        .worker("fast", ScriptedWorker::new())
        .worker("slow", SlowWorker::new(Duration::from_secs(30)));
    let process = Process::new(graph, roster)?;

    let report = with_timeout(
        process.run(RunOptions::default().deadline(Duration::from_millis(200))),
    )
    .await?;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(report.status_of("fast"), Some(ItemStatus::Completed));
    assert_eq!(report.output("fast"), Some("fast done"));
    assert_eq!(report.status_of("slow"), Some(ItemStatus::Failed));
    assert_eq!(report.outcome("slow").unwrap().error, Some(ItemError::Cancelled));
    assert_eq!(report.status_of("never"), Some(ItemStatus::NotStarted));
    assert_eq!(flowdag::exit_code(&report), flowdag::EXIT_CANCELLED);

    match report.ensure_finished() {
        Err(FlowdagError::Cancelled(report)) => assert_eq!(report.completed_count(), 1),
        other => panic!("expected a cancellation error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn external_cancel_stops_concurrent_batch() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("slow")
        .item(WorkItem::new("a").entry().concurrent().then("after"))
        .item(WorkItem::new("b").entry().concurrent())
        .item(WorkItem::new("after"))
        .build()?;

    let process = Process::new(
        graph,
        Roster::new().worker("slow", SlowWorker::new(Duration::from_secs(30))),
    )?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let report = with_timeout(process.run(RunOptions::default().cancel_with(cancel))).await?;

    assert!(report.is_cancelled());
    assert_eq!(report.status_of("a"), Some(ItemStatus::Failed));
    assert_eq!(report.status_of("b"), Some(ItemStatus::Failed));
    assert_eq!(report.status_of("after"), Some(ItemStatus::NotStarted));
    Ok(())
}

#[tokio::test]
async fn stuck_worker_is_abandoned_after_grace() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .cancel_grace(Duration::from_millis(50))
        .item(WorkItem::new("stuck").worker("stuck"))
        .build()?;

    let process = Process::new(graph, Roster::new().worker("stuck", StuckWorker))?;
    let report = with_timeout(
        process.run(RunOptions::default().deadline(Duration::from_millis(100))),
    )
    .await?;

    assert!(report.is_cancelled());
    assert_eq!(report.status_of("stuck"), Some(ItemStatus::Failed));
    assert_eq!(report.outcome("stuck").unwrap().error, Some(ItemError::Cancelled));
    Ok(())
}

#[tokio::test]
async fn batches_respect_max_concurrency() -> TestResult {
    init_tracing();

    let mut builder = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("slow")
        .max_concurrency(2);
    for id in ["a", "b", "c", "d", "e"] {
        builder = builder.item(WorkItem::new(id).entry().concurrent());
    }
    let graph = builder.build()?;

    let worker = SlowWorker::new(Duration::from_millis(20));
    let probe = worker.clone();
    let process = Process::new(graph, Roster::new().worker("slow", worker))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.completed_count(), 5);
    assert!(probe.peak() <= 2, "peak concurrency was {}", probe.peak());
    assert!(probe.peak() >= 1);
    Ok(())
}

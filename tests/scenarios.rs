// tests/scenarios.rs

use std::error::Error;

use flowdag::dag::{ProcessGraph, WorkItem};
use flowdag::exec::{FnWorker, Roster, WorkRequest, WorkerError};
use flowdag::process::Process;
use flowdag::types::{ItemStatus, RunStatus, Topology};
use flowdag_test_utils::workers::{EchoWorker, ScriptedWorker};
use flowdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn chain_passes_output_verbatim() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .item(WorkItem::new("A").entry().then("B"))
        .item(WorkItem::new("B").depends_on("A"))
        .build()?;

    let stub = FnWorker::new(|req: WorkRequest| async move {
        match req.item.as_str() {
            "A" => Ok::<_, WorkerError>("42".to_string()),
            _ => Ok(format!("input was: {}", req.input)),
        }
    });

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(report.output("A"), Some("42"));
    assert_eq!(report.output("B"), Some("input was: 42"));
    assert_eq!(report.status_of("A"), Some(ItemStatus::Completed));
    assert_eq!(report.status_of("B"), Some(ItemStatus::Completed));
    assert!(report.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn decision_reroutes_until_valid() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .item(WorkItem::decision(
            "D",
            [("valid", vec![]), ("invalid", vec!["retry_item".to_string()])],
        )?.entry())
        .item(WorkItem::decision(
            "retry_item",
            [("valid", vec![]), ("invalid", vec!["retry_item".to_string()])],
        )?)
        .build()?;

    let stub = ScriptedWorker::new()
        .reply("D", "invalid")
        .reply("retry_item", " Valid\n");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(report.status_of("D"), Some(ItemStatus::Completed));
    assert_eq!(report.status_of("retry_item"), Some(ItemStatus::Completed));
    assert_eq!(report.execution_order, vec!["D", "retry_item"]);
    assert_eq!(log.len(), 2);
    assert!(report.blocked.is_empty());
    Ok(())
}

#[tokio::test]
async fn items_only_see_declared_context() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("stub")
        .item(WorkItem::new("A"))
        .item(WorkItem::new("B"))
        .item(WorkItem::new("C").depends_on("A").describe("summarize"))
        .build()?;

    let stub = ScriptedWorker::new()
        .reply("A", "alpha output")
        .reply("B", "beta output");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;
    assert_eq!(report.completed_count(), 3);

    let calls = log.for_item("C");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].input.contains("alpha output"));
    assert!(!calls[0].input.contains("beta output"));
    assert!(calls[0].input.contains("summarize"));
    Ok(())
}

#[tokio::test]
async fn duplicate_context_outputs_collapse() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("stub")
        .item(WorkItem::new("A"))
        .item(WorkItem::new("B"))
        .item(WorkItem::new("C").depends_on("A").depends_on("B"))
        .build()?;

    let stub = ScriptedWorker::new().reply("A", "same").reply("B", "same");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    with_timeout(process.kickoff()).await?;

    assert_eq!(log.for_item("C")[0].input, "same");
    Ok(())
}

#[tokio::test]
async fn repeated_runs_are_identical() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("echo")
        .max_concurrency(3)
        .item(WorkItem::new("a").entry().concurrent().describe("first {{topic}}").then("c"))
        .item(WorkItem::new("b").entry().concurrent().describe("second").then("c"))
        .item(WorkItem::new("c").depends_on("a").depends_on("b"))
        .var("topic", "graphs")
        .build()?;

    let process = Process::new(graph, Roster::new().worker("echo", EchoWorker::new()))?;

    let first = with_timeout(process.kickoff()).await?;
    let second = with_timeout(process.kickoff()).await?;

    assert_eq!(first.results, second.results);
    assert_eq!(first.execution_order, second.execution_order);
    assert_eq!(first.output("a"), Some("# Task\nfirst graphs"));
    assert_eq!(
        first.output("c"),
        Some("# Task\nfirst graphs\n\n# Task\nsecond")
    );
    Ok(())
}

#[tokio::test]
async fn sequential_runs_in_declaration_order() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::Sequential)
        .default_worker("stub")
        .item(WorkItem::new("third_by_name"))
        .item(WorkItem::new("first_by_name"))
        .item(WorkItem::decision("d", [("x", vec!["first_by_name".to_string()])])?)
        .build()?;

    let stub = ScriptedWorker::new().reply("d", "no such branch");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(log.items(), vec!["third_by_name", "first_by_name", "d"]);
    // Sequential ignores condition tables entirely.
    assert_eq!(report.status_of("d"), Some(ItemStatus::Completed));
    Ok(())
}

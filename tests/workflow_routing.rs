// tests/workflow_routing.rs

use std::error::Error;

use flowdag::dag::{ProcessGraph, WorkItem};
use flowdag::exec::Roster;
use flowdag::process::Process;
use flowdag::types::{ItemStatus, RunStatus, Topology};
use flowdag_test_utils::workers::ScriptedWorker;
use flowdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn join_reached_from_two_successors_runs_once() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .item(WorkItem::new("A").entry().then("C"))
        .item(WorkItem::new("C"))
        .item(WorkItem::new("B").entry().then("C"))
        .build()?;

    let stub = ScriptedWorker::new().reply("C", "c-out");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(report.execution_order, vec!["A", "C", "B"]);
    assert_eq!(log.for_item("C").len(), 1);
    assert_eq!(report.attempts("C"), 1);
    assert_eq!(report.output("C"), Some("c-out"));
    assert!(report.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn diamond_join_runs_once_with_both_inputs() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .max_concurrency(2)
        .item(WorkItem::new("S").entry().then("L").then("R"))
        .item(WorkItem::new("L").concurrent().then("J"))
        .item(WorkItem::new("R").concurrent().then("J"))
        .item(WorkItem::new("J").depends_on("L").depends_on("R"))
        .build()?;

    let stub = ScriptedWorker::new();
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    let joins = log.for_item("J");
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].input, "L done\n\nR done");
    for id in ["S", "L", "R", "J"] {
        assert_eq!(report.status_of(id), Some(ItemStatus::Completed), "{id}");
        assert_eq!(report.attempts(id), 1, "{id}");
    }
    Ok(())
}

#[tokio::test]
async fn completed_item_survives_a_second_predecessor_after_its_budget() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .max_iterations(1)
        .item(WorkItem::new("A").entry().then("C"))
        .item(WorkItem::new("C"))
        .item(WorkItem::new("B").entry().then("C"))
        .build()?;

    let stub = ScriptedWorker::new().reply("C", "c-out");
    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status_of("C"), Some(ItemStatus::Completed));
    let outcome = report.outcome("C").unwrap();
    assert_eq!(outcome.raw_text, "c-out");
    assert_eq!(outcome.error, None);
    assert!(!report.has_failures());
    Ok(())
}

#[tokio::test]
async fn branch_back_to_spent_item_keeps_its_output() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .max_iterations(1)
        .item(WorkItem::new("C").entry().then("D"))
        .item(WorkItem::decision(
            "D",
            [("again", vec!["C".to_string()]), ("done", vec![])],
        )?)
        .build()?;

    let stub = ScriptedWorker::new().reply("C", "c-out").reply("D", "again");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(log.items(), vec!["C", "D"]);
    assert_eq!(report.status_of("C"), Some(ItemStatus::Completed));
    assert_eq!(report.output("C"), Some("c-out"));
    assert_eq!(report.status_of("D"), Some(ItemStatus::Completed));
    assert!(report.errors.is_empty());
    Ok(())
}

#[tokio::test]
async fn rejected_review_re_runs_draft_and_review() -> TestResult {
    init_tracing();

    let graph = ProcessGraph::builder(Topology::WorkflowGraph)
        .default_worker("stub")
        .max_iterations(3)
        .item(WorkItem::new("draft").entry().then("review"))
        .item(
            WorkItem::decision(
                "review",
                [("approved", vec![]), ("rejected", vec!["draft".to_string()])],
            )?
            .depends_on("draft"),
        )
        .build()?;

    let stub = ScriptedWorker::new()
        .reply("draft", "v1")
        .reply("draft", "v2")
        .reply("review", "Rejected")
        .reply("review", "approved");
    let log = stub.log();

    let process = Process::new(graph, Roster::new().worker("stub", stub))?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(log.items(), vec!["draft", "review", "draft", "review"]);
    assert_eq!(report.attempts("draft"), 2);
    assert_eq!(report.attempts("review"), 2);
    assert_eq!(report.output("draft"), Some("v2"));

    let reviews = log.for_item("review");
    assert!(reviews[1].input.starts_with("v2"), "{}", reviews[1].input);
    Ok(())
}

// tests/hierarchical.rs

use std::error::Error;

use flowdag::dag::{ProcessGraph, RetryPolicy, WorkItem};
use flowdag::exec::Roster;
use flowdag::process::Process;
use flowdag::process::manager::MANAGER_ITEM;
use flowdag::types::{ItemStatus, RunStatus, Topology};
use flowdag_test_utils::workers::ScriptedWorker;
use flowdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn two_items(manager_retries: u32) -> ProcessGraph {
    ProcessGraph::builder(Topology::Hierarchical)
        .manager(
            "lead",
            RetryPolicy {
                max_retries: manager_retries,
                ..RetryPolicy::default()
            },
        )
        .item(WorkItem::new("research").describe("dig up facts"))
        .item(WorkItem::new("write").describe("write the article").worker("writer"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn manager_picks_order_and_worker() -> TestResult {
    init_tracing();

    let lead = ScriptedWorker::new()
        .reply(MANAGER_ITEM, r#"{"item": "write", "worker": "researcher"}"#)
        .reply(MANAGER_ITEM, "```json\n{\"item\": \"research\", \"worker\": \"writer\"}\n```");
    let lead_log = lead.log();
    let researcher = ScriptedWorker::new();
    let researcher_log = researcher.log();
    let writer = ScriptedWorker::new();
    let writer_log = writer.log();

    let roster = Roster::new()
        .worker("lead", lead)
        .worker("researcher", researcher)
        .worker("writer", writer);
    let process = Process::new(two_items(1), roster)?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.status, RunStatus::Finished);
    assert_eq!(report.execution_order, vec!["write", "research"]);
    assert_eq!(researcher_log.items(), vec!["write"]);
    assert_eq!(writer_log.items(), vec!["research"]);
    assert_eq!(report.outcome("write").unwrap().worker.as_deref(), Some("researcher"));

    let prompts = lead_log.calls();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].input.contains("- research"));
    assert!(prompts[0].input.contains("- write"));
    assert!(prompts[0].input.contains("[suggested worker: writer]"));
    assert!(!prompts[0].input.contains("- lead"));
    assert!(prompts[1].input.contains("Already completed: write"));
    Ok(())
}

#[tokio::test]
async fn invalid_choice_is_retried_with_feedback() -> TestResult {
    init_tracing();

    let lead = ScriptedWorker::new()
        .reply(MANAGER_ITEM, r#"{"item": "publish", "worker": "writer"}"#)
        .reply(MANAGER_ITEM, r#"{"item": "research", "worker": "writer"}"#)
        .reply(MANAGER_ITEM, r#"{"item": "write", "worker": "writer"}"#);
    let lead_log = lead.log();

    let roster = Roster::new()
        .worker("lead", lead)
        .worker("writer", ScriptedWorker::new());
    let process = Process::new(two_items(1), roster)?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.execution_order, vec!["research", "write"]);
    let prompts = lead_log.calls();
    assert_eq!(prompts.len(), 3);
    assert_eq!(prompts[1].invocation, 2);
    assert!(prompts[1].input.contains("# Feedback\n'publish' is not runnable"));
    Ok(())
}

#[tokio::test]
async fn exhausted_manager_falls_back_to_declaration_order() -> TestResult {
    init_tracing();

    // The manager never answers with JSON.
    let lead = ScriptedWorker::new().reply_n(MANAGER_ITEM, "whatever you like", 10);
    let lead_log = lead.log();

    let roster = Roster::new()
        .worker("lead", lead)
        .worker("writer", ScriptedWorker::new())
        .worker("zeta", ScriptedWorker::new());
    let process = Process::new(two_items(2), roster)?;
    let report = with_timeout(process.kickoff()).await?;

    assert_eq!(report.execution_order, vec!["research", "write"]);
    assert_eq!(report.status_of("research"), Some(ItemStatus::Completed));
    assert_eq!(report.status_of("write"), Some(ItemStatus::Completed));
    // Two rounds, three invocations each.
    assert_eq!(lead_log.len(), 6);
    // `research` has no worker of its own: first assignable worker by name.
    assert_eq!(report.outcome("research").unwrap().worker.as_deref(), Some("writer"));
    assert_eq!(report.outcome("write").unwrap().worker.as_deref(), Some("writer"));
    Ok(())
}

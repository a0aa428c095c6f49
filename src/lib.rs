// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod process;
pub mod store;
pub mod types;

use std::path::PathBuf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::GraphFile;
use crate::config::loader::load_and_validate;
use crate::dag::ProcessGraph;
use crate::exec::Roster;
use crate::process::{Process, RunOptions, RunReport};

pub use crate::errors::{FlowdagError, ItemError};

/// Exit code when the run was cancelled (Ctrl-C or deadline).
pub const EXIT_CANCELLED: i32 = 1;
/// Exit code when at least one item failed.
pub const EXIT_ITEM_FAILED: i32 = 2;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - graph loading and validation
/// - command workers declared in the graph file
/// - the process run
/// - Ctrl-C handling
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let file = load_and_validate(&config_path)?;

    if args.dry_run {
        print_dry_run(&file);
        return Ok(0);
    }

    let roster = Roster::from_worker_configs(&file.workers)?;
    let process = Process::new(file.graph, roster)?;

    // Ctrl-C → cancel the run; in-flight items get the grace period.
    let cancel = CancellationToken::new();
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling run");
            token.cancel();
        });
    }

    let mut options = RunOptions::default().cancel_with(cancel);
    options.vars.extend(args.vars.iter().cloned());
    options.deadline = args.deadline;
    options.max_concurrency = args.max_concurrency;

    let report = process.run(options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(process.graph(), &report);
    }

    Ok(exit_code(&report))
}

/// 0 when everything finished, [`EXIT_CANCELLED`] or [`EXIT_ITEM_FAILED`]
/// otherwise.
pub fn exit_code(report: &RunReport) -> i32 {
    if report.is_cancelled() {
        EXIT_CANCELLED
    } else if report.has_failures() {
        EXIT_ITEM_FAILED
    } else {
        0
    }
}

fn print_summary(graph: &ProcessGraph, report: &RunReport) {
    println!(
        "flowdag run {} ({}): {} completed, {} failed",
        report.status,
        report.topology,
        report.completed_count(),
        report.failed_count()
    );

    for item in graph.items() {
        let status = report
            .status_of(&item.id)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let attempts = report.attempts(&item.id);
        println!("  - {} [{status}, attempts: {attempts}]", item.id);

        match report.outcome(&item.id) {
            Some(outcome) if outcome.is_success() => {
                if let Some(line) = outcome.raw_text.lines().find(|l| !l.trim().is_empty()) {
                    println!("      {}", line.trim());
                }
            }
            Some(outcome) => {
                if let Some(ref err) = outcome.error {
                    println!("      error: {err}");
                }
            }
            None => {}
        }
    }

    for blocked in report.blocked.iter() {
        match blocked.blocked_by {
            Some(ref dep) => println!("  blocked: {} (waiting on {dep})", blocked.item),
            None => println!("  blocked: {}", blocked.item),
        }
    }
}

/// Simple dry-run output: print settings and items.
fn print_dry_run(file: &GraphFile) {
    let graph = &file.graph;
    let settings = graph.settings();

    println!("flowdag dry-run");
    println!("  process.topology = {}", settings.topology);
    println!("  process.max_iterations = {}", settings.max_iterations);
    println!("  process.max_concurrency = {}", settings.max_concurrency);
    if let Some(ref manager) = settings.manager {
        println!("  process.manager = {}", manager.worker);
    }
    if let Some(ref worker) = settings.default_worker {
        println!("  process.default_worker = {worker}");
    }
    if let Some(deadline) = settings.deadline {
        println!("  process.deadline = {deadline:?}");
    }
    println!();

    if !file.workers.is_empty() {
        println!("workers ({}):", file.workers.len());
        for (name, worker) in file.workers.iter() {
            println!("  - {name}: {}", worker.cmd);
        }
        println!();
    }

    println!("items ({}):", graph.len());
    for item in graph.items() {
        println!("  - {} ({})", item.id, item.kind.label());
        if let Some(worker) = graph.worker_for(item) {
            println!("      worker: {worker}");
        }
        if item.entry_point {
            println!("      entry: true");
        }
        if !item.depends_on.is_empty() {
            println!("      context: {:?}", item.depends_on);
        }
        if !item.successors.is_empty() {
            println!("      successors: {:?}", item.successors);
        }
        if let Some(table) = item.kind.condition_table() {
            for branch in table.branches() {
                println!("      on '{}' -> {:?}", branch.key, branch.next);
            }
        }
        if let Some(ref guardrail) = item.guardrail {
            println!("      guardrail: {guardrail}");
        }
    }

    debug!("dry-run complete (no execution)");
}

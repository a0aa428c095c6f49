// tests/scheduler_termination.rs

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use flowdag::ItemError;
use flowdag::dag::{ProcessGraph, Scheduler, WorkItem};
use flowdag::store::Outcome;
use flowdag::types::{ItemStatus, Topology};

const MAX_ITERATIONS: u32 = 3;

/// Random graphs of plain items: context edges only point backwards (so
/// they stay acyclic), successor edges may point anywhere (so they can form
/// cycles and fan-in joins).
fn graph_strategy(max_items: usize) -> impl Strategy<Value = (ProcessGraph, HashSet<String>)> {
    (1..=max_items).prop_flat_map(|n| {
        (
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..3), n),
            proptest::collection::vec(any::<bool>(), n),
            proptest::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(deps, succs, async_flags, failing)| {
                let mut builder = ProcessGraph::builder(Topology::WorkflowGraph)
                    .max_iterations(MAX_ITERATIONS)
                    .max_concurrency(3);
                let mut fail = HashSet::new();

                for i in 0..n {
                    let id = format!("item_{i}");
                    let mut item = WorkItem::new(id.clone());
                    if i == 0 {
                        item = item.entry();
                    }
                    if i > 0 {
                        for d in deps[i].iter() {
                            item = item.depends_on(format!("item_{}", d % i));
                        }
                    }
                    for s in succs[i].iter() {
                        item = item.then(format!("item_{}", s % n));
                    }
                    if async_flags[i] {
                        item = item.concurrent();
                    }
                    if failing[i] {
                        fail.insert(id);
                    }
                    builder = builder.item(item);
                }

                let graph = builder.build().expect("generated graph is valid");
                (graph, fail)
            })
    })
}

proptest! {
    #[test]
    fn plain_successors_run_each_item_at_most_once((graph, failing) in graph_strategy(8)) {
        let n = graph.len();
        let mut scheduler = Scheduler::new(Arc::new(graph));
        scheduler.start();

        // Only condition tables re-enter finished items; plain successor
        // edges (cycles and joins included) never do.
        let max_dispatches = n;
        let mut dispatched = 0usize;
        let mut completed: HashSet<String> = HashSet::new();

        loop {
            let batch = scheduler.dispatch_batch(3);
            if batch.is_empty() {
                break;
            }
            prop_assert!(batch.len() <= 3);

            for item in batch {
                dispatched += 1;
                let outcome = if failing.contains(&item.id) {
                    Outcome::failure(ItemError::Executor { message: "stub".into() })
                } else {
                    Outcome::success(format!("{} ok", item.id))
                };
                scheduler.complete(&item.id, outcome);
            }

            for id in completed.iter() {
                prop_assert_eq!(scheduler.status_of(id), Some(ItemStatus::Completed));
            }
            for item in scheduler.graph().items() {
                if scheduler.status_of(&item.id) == Some(ItemStatus::Completed) {
                    completed.insert(item.id.clone());
                }
            }

            prop_assert!(dispatched <= max_dispatches, "dispatched {} items", dispatched);
        }

        prop_assert!(scheduler.is_finished());
        prop_assert_eq!(scheduler.in_flight_count(), 0);

        for item in scheduler.graph().items() {
            let status = scheduler.status_of(&item.id);
            prop_assert_ne!(status, Some(ItemStatus::InProgress));
            prop_assert!(scheduler.store().attempt(&item.id) <= 1);
        }
    }
}

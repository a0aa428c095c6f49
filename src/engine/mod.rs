// src/engine/mod.rs

//! Orchestration engine for flowdag.
//!
//! This module ties together:
//! - the scheduler
//! - the main runtime event loop that reacts to:
//!   - the initial run request
//!   - item completion events reported by the executor backend
//!   - cancellation (external token or run deadline)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::store::Outcome;
use crate::types::ItemId;

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Upper bound on the size of a dispatch batch.
    pub max_concurrency: usize,
    /// How long to wait for in-flight items once the run is cancelled.
    pub cancel_grace: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            cancel_grace: Duration::from_secs(2),
        }
    }
}

/// Events flowing into the runtime from the shell and the executor backend.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Activate the initial frontier and dispatch the first batch.
    RunRequested,
    /// An item's attempt finished (successfully or not).
    ItemFinished {
        item: ItemId,
        attempt: u32,
        outcome: Outcome,
    },
    /// Stop dispatching; finish once in-flight items are accounted for.
    CancelRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;

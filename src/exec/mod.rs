// src/exec/mod.rs

//! Execution layer.
//!
//! - [`worker`] is the executor boundary (`Worker`, `WorkRequest`).
//! - [`validator`] holds guardrails (`Validator`, `Verdict`).
//! - [`tools`] is the named tool registry handed to workers.
//! - [`parse`] interprets raw output against an item's output schema.
//! - [`guard`] is the Retry/Guardrail Controller wrapping one attempt.
//! - [`command`] is a worker that runs shell commands.
//! - [`roster`] is the explicit registry of all of the above.
//! - [`backend`] provides the `ExecutorBackend` trait and the production
//!   `PooledBackend` that the runtime uses, and which tests can replace with
//!   a fake implementation.

pub mod backend;
pub mod command;
pub mod guard;
pub mod parse;
pub mod roster;
pub mod tools;
pub mod validator;
pub mod worker;

pub use backend::{ExecutorBackend, PooledBackend, execute_item};
pub use command::CommandWorker;
pub use roster::Roster;
pub use tools::{Tool, ToolError, ToolRef, ToolRegistry};
pub use validator::{FnValidator, Validator, Verdict, WorkerValidator};
pub use worker::{FnWorker, WorkRequest, Worker, WorkerError};

// src/errors.rs

//! Crate-wide error types.
//!
//! [`FlowdagError`] is what the public entry points return. [`ItemError`] is
//! recorded on a single item's outcome and never aborts a run by itself.

use serde::Serialize;
use thiserror::Error;

use crate::process::RunReport;

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in context dependencies: {0}")]
    DependencyCycle(String),

    #[error("Run cancelled with {} item(s) completed", .0.completed_count())]
    Cancelled(Box<RunReport>),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowdagError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        FlowdagError::ConfigError(msg.into())
    }
}

/// Item-local failure kinds. Recorded on the failing item's outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemError {
    #[error("executor failed: {message}")]
    Executor { message: String },

    #[error("output rejected: {reason}")]
    Validation { reason: String },

    #[error("classification '{classification}' matches no branch (expected one of {expected:?})")]
    BranchResolution {
        classification: String,
        expected: Vec<String>,
    },

    #[error("exceeded the limit of {limit} iteration(s)")]
    MaxIterationsExceeded { limit: u32 },

    #[error("cancelled")]
    Cancelled,
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;

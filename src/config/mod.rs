// src/config/mod.rs

//! Graph definition loading and validation.
//!
//! - [`model`]: the serde-backed file format.
//! - [`loader`]: read a file from disk (TOML or JSON).
//! - [`validate`]: turn a raw file into a checked [`crate::dag::ProcessGraph`].
//! - [`duration`]: `"500ms"`-style duration strings.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate};
pub use model::{
    DefaultSection, GraphFile, ProcessSection, RawGraphFile, RawWorkItem, RetrySection,
    WorkerConfig,
};
pub use validate::validate_items;

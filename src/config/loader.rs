// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{GraphFile, RawGraphFile};
use crate::errors::Result;

/// Load a graph file from a given path and return the raw `RawGraphFile`.
///
/// Files ending in `.json` are parsed as JSON, everything else as TOML.
/// This only performs deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawGraphFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        from_json_str(&contents)
    } else {
        from_toml_str(&contents)
    }
}

pub fn from_toml_str(contents: &str) -> Result<RawGraphFile> {
    let raw: RawGraphFile = toml::from_str(contents)?;
    Ok(raw)
}

pub fn from_json_str(contents: &str) -> Result<RawGraphFile> {
    let raw: RawGraphFile = serde_json::from_str(contents)?;
    Ok(raw)
}

/// Load a graph file from path and validate it.
///
/// - Reads TOML/JSON.
/// - Applies defaults (`serde` defaults + `[defaults]` section).
/// - Checks for unknown references, missing condition tables, cycles in
///   `context` dependencies and topology requirements.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<GraphFile> {
    let raw = load_from_path(&path)?;
    GraphFile::try_from(raw)
}

/// Parse and validate a TOML graph held in memory.
pub fn parse_and_validate(contents: &str) -> Result<GraphFile> {
    GraphFile::try_from(from_toml_str(contents)?)
}

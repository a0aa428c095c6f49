// src/exec/tools.rs

//! Named capabilities offered to workers.
//!
//! Items list tools by name; the names are resolved against a
//! [`ToolRegistry`] when the item is dispatched and the resolved handles
//! travel with the [`crate::exec::WorkRequest`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::BoxFuture;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("tool failed: {0}")]
    Failed(String),
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn call(&self, input: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value, ToolError>>;
}

impl fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

pub type ToolRef = Arc<dyn Tool>;

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolRef>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous one.
    pub fn register(&mut self, tool: ToolRef) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolRef> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Resolve `names` in order. Fails on the first unknown name.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ToolRef>, String> {
        names
            .iter()
            .map(|name| {
                self.tools
                    .get(name)
                    .cloned()
                    .ok_or_else(|| format!("unknown tool '{name}'"))
            })
            .collect()
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn call(
            &self,
            input: serde_json::Value,
        ) -> BoxFuture<'_, Result<serde_json::Value, ToolError>> {
            Box::pin(async move {
                let s = input
                    .as_str()
                    .ok_or_else(|| ToolError::InvalidInput("expected a string".into()))?;
                Ok(serde_json::Value::String(s.to_uppercase()))
            })
        }
    }

    #[tokio::test]
    async fn resolves_registered_tools_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));

        let tools = registry.resolve(&["upper".to_string()]).unwrap();
        let out = tools[0].call(serde_json::json!("hi")).await.unwrap();
        assert_eq!(out, serde_json::json!("HI"));

        let err = registry
            .resolve(&["upper".to_string(), "search".to_string()])
            .unwrap_err();
        assert!(err.contains("search"));
    }
}

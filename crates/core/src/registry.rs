//! Tool Registry
//!
//! Maps tool names to their schema and handler. Tools are attached once at
//! startup; the registry is then shared read-only by every realtime session.

use crate::tool::{Tool, ToolHandler, ToolSchema};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' is already registered")]
    Duplicate(String),
    #[error("Unknown tool '{0}'")]
    Unknown(String),
}

/// Registration-ordered collection of tools, keyed by name.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tool under `name`. Names are unique for the life of the registry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        schema: ToolSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(ToolError::Duplicate(name));
        }
        self.index.insert(name.clone(), self.tools.len());
        self.tools.push(Tool {
            name,
            schema,
            handler,
        });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&Tool, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::Unknown(name.to_string()))
    }

    /// Names of every registered tool, in registration order.
    pub fn list_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// The function-tool array advertised to the realtime model.
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(Tool::function_definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

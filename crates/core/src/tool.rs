//! Tool Invocation Contract
//!
//! A tool is a named capability the realtime model may call mid-conversation.
//! Every tool exposes a JSON schema describing its arguments and an async
//! handler that turns those arguments into a [`ToolResult`].

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::generate::SchemaSettings;
use serde_json::{Map, Value, json};
use std::{fmt, sync::Arc};

/// Arguments passed to a tool handler, already parsed from the streamed JSON.
pub type ToolArgs = Map<String, Value>;

/// Who receives the output of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResultDirection {
    /// Fed back into the model's context as a function call output.
    ToServer,
    /// Forwarded to the browser client without re-entering the model.
    ToClient,
}

/// The outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub text: String,
    pub destination: ToolResultDirection,
}

impl ToolResult {
    pub fn to_server(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            destination: ToolResultDirection::ToServer,
        }
    }

    pub fn to_client(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            destination: ToolResultDirection::ToClient,
        }
    }

    /// Serializes `value` as the payload of a model-directed result.
    pub fn json_to_server(value: &Value) -> Self {
        Self::to_server(value.to_string())
    }

    /// Builds the error-shaped result the model receives when a tool fails.
    ///
    /// The message is conversational content, so callers must keep internal
    /// details out of it.
    pub fn error(message: &str) -> Self {
        Self::json_to_server(&json!({ "error": message }))
    }
}

/// The executable half of a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> Result<ToolResult>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArgs) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync,
{
    async fn call(&self, args: ToolArgs) -> Result<ToolResult> {
        (self.0)(args).await
    }
}

/// Wraps a closure returning a boxed future as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolArgs) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// The advertised half of a tool: what the model sees in the session's tool list.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSchema {
    pub description: String,
    /// JSON schema of the accepted arguments object.
    pub parameters: Value,
}

impl ToolSchema {
    pub fn new(description: impl Into<String>, parameters: Value) -> Self {
        Self {
            description: description.into(),
            parameters,
        }
    }

    /// Derives the parameter schema from an argument struct.
    ///
    /// Nested types are inlined and the root `title` is dropped, as the
    /// realtime API expects a single self-contained object schema.
    pub fn for_args<T: schemars::JsonSchema>(description: impl Into<String>) -> Self {
        let generator = SchemaSettings::draft2020_12()
            .with(|s| {
                s.inline_subschemas = true;
                s.meta_schema = None;
            })
            .into_generator();
        let mut parameters = serde_json::to_value(generator.into_root_schema_for::<T>())
            .unwrap_or_else(|_| json!({ "type": "object" }));
        if let Some(object) = parameters.as_object_mut() {
            object.remove("$schema");
            object.remove("title");
        }
        Self::new(description, parameters)
    }
}

/// A registered tool: name, schema and handler.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub schema: ToolSchema,
    pub handler: Arc<dyn ToolHandler>,
}

impl Tool {
    /// Renders the function-tool object advertised in `session.update`.
    pub fn function_definition(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.schema.description,
            "parameters": self.schema.parameters,
        })
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}
